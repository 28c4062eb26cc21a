//! Platform enumeration endpoints.
//!
//! Thin typed wrappers over the tenant-facing resource APIs: environments,
//! canvas apps and their permissions, connections, and connector
//! specifications. List endpoints paginate through absolute `nextLink`
//! URLs, followed iteratively.

use connsurveyor_core::error::{redact_url, ConnSurveyorError, Result};
use connsurveyor_core::transport::ApiClient;
use reqwest::Method;
use serde_json::Value;

/// Default platform endpoint; overridable for sovereign clouds and stubs.
pub const DEFAULT_API_BASE_URL: &str = "https://api.powerapps.com";

const API_VERSION: &str = "2016-11-01";

/// Typed access to the platform's resource enumeration surface.
#[derive(Debug, Clone)]
pub struct PlatformApi {
    client: ApiClient,
    base_url: String,
}

impl PlatformApi {
    pub fn new(client: ApiClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Environment ids visible to the credential.
    ///
    /// # Errors
    /// A non-200 answer is fatal for the run; nothing else can be
    /// enumerated without the environment list.
    pub async fn list_environments(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}/providers/Microsoft.PowerApps/environments",
            self.base_url
        );
        let response = self
            .client
            .request_and_verify(
                Method::GET,
                &url,
                &[("api-version".to_string(), API_VERSION.to_string())],
                "200",
                true,
            )
            .await?;
        if !response.success {
            return Err(ConnSurveyorError::unexpected_status(
                "list_environments",
                response.status,
            ));
        }

        let names = response
            .body
            .json()
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_array())
            .map(|envs| {
                envs.iter()
                    .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| {
                ConnSurveyorError::invalid_response("Environment listing has no value array")
            })?;
        Ok(names)
    }

    /// Raw canvas apps of one environment.
    pub async fn list_canvas_apps(&self, environment_id: &str) -> Result<Vec<Value>> {
        self.paginate(
            &format!("{}/providers/Microsoft.PowerApps/apps", self.base_url),
            environment_id,
        )
        .await
    }

    /// Raw permission assignments of one canvas app.
    pub async fn list_canvas_app_permissions(
        &self,
        app_id: &str,
        environment_id: &str,
    ) -> Result<Vec<Value>> {
        self.paginate(
            &format!(
                "{}/providers/Microsoft.PowerApps/apps/{app_id}/permissions",
                self.base_url
            ),
            environment_id,
        )
        .await
    }

    /// Raw connections of one environment.
    pub async fn list_connections(&self, environment_id: &str) -> Result<Vec<Value>> {
        self.paginate(
            &format!(
                "{}/providers/Microsoft.PowerApps/connections",
                self.base_url
            ),
            environment_id,
        )
        .await
    }

    /// One connector's raw specification document.
    ///
    /// # Errors
    /// Any non-200 status is returned as `UnexpectedStatus` so the caller
    /// can apply its 403/400 skip policy.
    pub async fn get_connector(
        &self,
        environment_id: &str,
        connector_id: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/providers/Microsoft.PowerApps/apis/{connector_id}",
            self.base_url
        );
        let response = self
            .client
            .request_and_verify(
                Method::GET,
                &url,
                &environment_query(environment_id),
                "200",
                true,
            )
            .await?;
        if !response.success {
            return Err(ConnSurveyorError::unexpected_status(
                format!("get_connector({connector_id})"),
                response.status,
            ));
        }
        response.body.json().cloned().ok_or_else(|| {
            ConnSurveyorError::invalid_response(format!(
                "Connector {connector_id} answered without a JSON body"
            ))
        })
    }

    /// Follows `nextLink` pagination, concatenating every page's `value`
    /// array. The link is an absolute URL carrying its own query.
    async fn paginate(&self, url: &str, environment_id: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let (page_url, query) = match &next {
                Some(link) => (link.clone(), Vec::new()),
                None => (url.to_string(), environment_query(environment_id)),
            };

            let response = self
                .client
                .request_and_verify(Method::GET, &page_url, &query, "200", true)
                .await?;
            if !response.success {
                return Err(ConnSurveyorError::unexpected_status(
                    redact_url(&page_url),
                    response.status,
                ));
            }

            let Some(page) = response.body.json() else {
                return Err(ConnSurveyorError::invalid_response(format!(
                    "Expected a JSON page from {}",
                    redact_url(&page_url)
                )));
            };

            if let Some(values) = page.get("value").and_then(|v| v.as_array()) {
                items.extend(values.iter().cloned());
            }

            match page.get("nextLink").and_then(|v| v.as_str()) {
                Some(link) => next = Some(link.to_string()),
                None => break,
            }
        }

        Ok(items)
    }
}

fn environment_query(environment_id: &str) -> Vec<(String, String)> {
    vec![
        ("api-version".to_string(), API_VERSION.to_string()),
        (
            "$filter".to_string(),
            format!("environment eq '{environment_id}'"),
        ),
    ]
}
