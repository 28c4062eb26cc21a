//! Authenticated HTTP transport shared by every collector and connector.
//!
//! One [`ApiClient`] wraps the bearer credential and provides the two calls
//! the rest of the engine is built on: [`ApiClient::request_and_verify`] for
//! single requests with throttling recovery, and
//! [`ApiClient::consecutive_gets`] for cursor-based pagination. No state is
//! retained between calls.
//!
//! # Security Guarantees
//! - The bearer credential lives in a zeroizing buffer and is attached only
//!   as the `Authorization` header
//! - Request URLs are logged with query values masked

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{redact_url, ConnSurveyorError, Result};

const TOOL_USER_AGENT: &str = concat!("connsurveyor/", env!("CARGO_PKG_VERSION"));

/// Fallback backoff when a throttling response does not declare a retry time.
const DEFAULT_THROTTLE_SECS: u64 = 20;

/// Parsed response body.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    /// Body was absent or not decodable in the requested shape.
    Empty,
}

impl ResponseBody {
    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Outcome of a verified request.
///
/// `success` is false for any status outside the expected prefix; the body
/// is still populated so callers can log or inspect it.
#[derive(Debug)]
pub struct ApiResponse {
    pub success: bool,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Header value as UTF-8, if present and decodable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Field names driving cursor-based pagination.
#[derive(Debug, Clone)]
pub struct PageOptions {
    data_field: String,
    page_token_field: String,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            data_field: "value".to_string(),
            page_token_field: "continuationToken".to_string(),
        }
    }
}

impl PageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field holding each page's items.
    #[must_use]
    pub fn with_data_field(mut self, field: impl Into<String>) -> Self {
        self.data_field = field.into();
        self
    }

    /// Field holding the next-page token.
    #[must_use]
    pub fn with_page_token_field(mut self, field: impl Into<String>) -> Self {
        self.page_token_field = field.into();
        self
    }
}

/// Concatenated pages from [`ApiClient::consecutive_gets`].
///
/// `success` is false when a page request failed; the values accumulated
/// before the failure are preserved, mirroring the callers' treat-as-empty
/// recovery.
#[derive(Debug)]
pub struct PagedValues {
    pub success: bool,
    pub values: Vec<serde_json::Value>,
}

/// Authenticated client. Cheap to clone; clones share the same underlying
/// connection pool and credential.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    token: Arc<Zeroizing<String>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Builds a client around an opaque, pre-validated bearer credential.
    ///
    /// # Errors
    /// Returns a configuration error if the credential contains bytes that
    /// cannot form a header value or the underlying client cannot be built.
    pub fn new(token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(TOOL_USER_AGENT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ConnSurveyorError::configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        if HeaderValue::from_str(token).is_err() {
            return Err(ConnSurveyorError::configuration(
                "Bearer credential is not a valid header value",
            ));
        }

        Ok(Self {
            http,
            token: Arc::new(Zeroizing::new(token.to_string())),
        })
    }

    /// Issues one request and verifies the status against a prefix.
    ///
    /// A status outside the prefix yields `success = false` with the body
    /// logged; HTTP 429 is never surfaced: the declared retry time is parsed
    /// from the body (20s when absent), slept, and the identical request is
    /// retried. Throttling is transient and server-bounded, so retries are
    /// not capped.
    ///
    /// # Errors
    /// Only genuine transport failures (request could not be sent, body
    /// could not be read) are returned as errors.
    pub async fn request_and_verify(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        expected_status_prefix: &str,
        is_json: bool,
    ) -> Result<ApiResponse> {
        loop {
            debug!("Triggering request {} {}", method, redact_url(url));

            let request = self
                .http
                .request(method.clone(), url)
                .header(AUTHORIZATION, self.token.as_str())
                .query(query);

            let response = request
                .send()
                .await
                .map_err(|e| ConnSurveyorError::transport(redact_url(url), e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let raw = response
                .text()
                .await
                .map_err(|e| ConnSurveyorError::transport(redact_url(url), e))?;

            let body = if is_json {
                serde_json::from_str(&raw)
                    .map(ResponseBody::Json)
                    .unwrap_or(ResponseBody::Empty)
            } else {
                ResponseBody::Text(raw.clone())
            };

            if status.to_string().starts_with(expected_status_prefix) {
                return Ok(ApiResponse {
                    success: true,
                    status,
                    headers,
                    body,
                });
            }

            if status == 429 {
                let wait = throttle_delay(body.json());
                info!(
                    "API throttled on {}, sleeping {}s before retry",
                    redact_url(url),
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            info!(
                "Failed request {} {} with status={} content={}",
                method,
                redact_url(url),
                status,
                raw
            );

            return Ok(ApiResponse {
                success: false,
                status,
                headers,
                body,
            });
        }
    }

    /// Follows cursor-based pagination, concatenating the data field of each
    /// page until the next-page token is absent or unchanged.
    ///
    /// A first page without the data field is tolerated as a bare
    /// single-object result; a later page without it is an inconsistent
    /// response and fails the call.
    ///
    /// # Errors
    /// Transport failures and inconsistent page shapes.
    pub async fn consecutive_gets(
        &self,
        url: &str,
        query: &[(String, String)],
        options: &PageOptions,
    ) -> Result<PagedValues> {
        let mut values: Vec<serde_json::Value> = Vec::new();
        let mut last_token: Option<String> = None;

        loop {
            let response = self
                .request_and_verify(Method::GET, url, query, "200", true)
                .await?;

            if !response.success {
                return Ok(PagedValues {
                    success: false,
                    values,
                });
            }

            let Some(page) = response.body.json() else {
                return Err(ConnSurveyorError::invalid_response(format!(
                    "Expected a JSON page from {}",
                    redact_url(url)
                )));
            };

            match page.get(&options.data_field) {
                Some(serde_json::Value::Array(items)) => {
                    values.extend(items.iter().cloned());
                }
                Some(other) => {
                    return Err(ConnSurveyorError::invalid_response(format!(
                        "Field '{}' from {} is not an array: {}",
                        options.data_field,
                        redact_url(url),
                        other
                    )));
                }
                None if values.is_empty() => {
                    // Some endpoints answer with a bare object instead of
                    // the documented array envelope.
                    warn!(
                        "Expected an array response from {}, received an object",
                        redact_url(url)
                    );
                    values.push(page.clone());
                }
                None => {
                    return Err(ConnSurveyorError::invalid_response(format!(
                        "Inconsistent pages from {}: field '{}' disappeared",
                        redact_url(url),
                        options.data_field
                    )));
                }
            }

            let token = page
                .get(&options.page_token_field)
                .and_then(|t| t.as_str())
                .map(str::to_string);

            match token {
                None => break,
                Some(token) if last_token.as_ref() == Some(&token) => break,
                Some(token) => last_token = Some(token),
            }
        }

        Ok(PagedValues {
            success: true,
            values,
        })
    }
}

/// Extracts the server-declared backoff from a throttling response body.
///
/// The platform phrases it as `"Rate limit is exceeded. Try again in N
/// seconds"`; one second is added to the declared wait. Anything else falls
/// back to a fixed 20s sleep.
fn throttle_delay(body: Option<&serde_json::Value>) -> Duration {
    let message = body
        .and_then(|b| b.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("");

    match parse_retry_seconds(message) {
        Some(seconds) => Duration::from_secs(seconds.saturating_add(1)),
        None => Duration::from_secs(DEFAULT_THROTTLE_SECS),
    }
}

/// Parses the declared wait out of a `"Try again in N seconds"` message.
fn parse_retry_seconds(message: &str) -> Option<u64> {
    let (_, rest) = message.split_once("Try again in ")?;
    let (seconds, _) = rest.split_once(" seconds")?;
    seconds.trim().parse().ok()
}
