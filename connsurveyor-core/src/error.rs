//! Error types with credential and query-string sanitization.
//!
//! All error types in this module ensure that bearer tokens, connection
//! parameters, and other sensitive request material are never exposed in
//! error messages, logs, or any output format.

use thiserror::Error;

/// Main error type for ConnSurveyor operations.
///
/// # Security
/// All error messages are sanitized to prevent credential leakage.
/// Bearer tokens and connection parameters are never included in error
/// output; request URLs are logged with query values masked.
#[derive(Debug, Error)]
pub enum ConnSurveyorError {
    /// HTTP request could not be sent or its body could not be read
    #[error("Transport failure: {context}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The platform answered with a status the caller cannot recover from
    #[error("Unexpected status {status} for {context}")]
    UnexpectedStatus { context: String, status: u16 },

    /// A response body did not have the shape the backend documents
    #[error("Invalid response: {context}")]
    InvalidResponse { context: String },

    /// A single record's content could not be fetched (recoverable: the
    /// data collector logs it and continues with the next record)
    #[error("Unable to fetch {record_type} record '{record_id}' via {api_name}")]
    RecordFetch {
        api_name: String,
        record_type: String,
        record_id: String,
    },

    /// A cached entity was produced by an incompatible tool version
    #[error("Cache entity {path} has schema version {found}, expected {expected}")]
    SchemaVersion {
        path: String,
        expected: String,
        found: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with ConnSurveyorError
pub type Result<T> = std::result::Result<T, ConnSurveyorError>;

/// Masks every query value in a request URL for logging.
///
/// Backend URLs routinely carry SAS tokens, filter expressions over mailbox
/// subjects, and other material that must not reach the log stream. Query
/// keys are kept so a failed request stays diagnosable.
///
/// # Example
///
/// ```rust
/// use connsurveyor_core::error::redact_url;
///
/// let sanitized = redact_url("https://host/v2/items?sig=secret&limit=10");
/// assert_eq!(sanitized, "https://host/v2/items?sig=****&limit=****");
/// assert!(!sanitized.contains("secret"));
/// ```
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut sanitized = parsed.clone();
            sanitized.set_query(None);
            let masked: Vec<String> = parsed
                .query_pairs()
                .map(|(k, _)| format!("{k}=****"))
                .collect();
            if masked.is_empty() {
                sanitized.to_string()
            } else {
                format!("{}?{}", sanitized, masked.join("&"))
            }
        }
        Err(_) => "<redacted>".to_string(),
    }
}

impl ConnSurveyorError {
    /// Creates a transport error with request context
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Creates an unexpected-status error for a fatal platform response
    pub fn unexpected_status(context: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            context: context.into(),
            status,
        }
    }

    /// Creates an invalid-response error
    pub fn invalid_response(context: impl Into<String>) -> Self {
        Self::InvalidResponse {
            context: context.into(),
        }
    }

    /// Creates the per-record fetch error raised by connector `dump`
    /// implementations and recovered by the data collector.
    pub fn record_fetch(
        api_name: impl Into<String>,
        record_type: impl std::fmt::Display,
        record_id: impl Into<String>,
    ) -> Self {
        Self::RecordFetch {
            api_name: api_name.into(),
            record_type: record_type.to_string(),
            record_id: record_id.into(),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an I/O error with path context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a serialization error with entity context
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Whether this error is scoped to a single record and should be
    /// recovered rather than aborting the connection's dump.
    pub fn is_record_scoped(&self) -> bool {
        matches!(self, Self::RecordFetch { .. })
    }
}
