//! Error types for flowlens-core

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Top-level error for a pipeline run.
///
/// Every variant is fatal: the run stops and the run state is left untouched.
/// During a run, best-effort stages report [`EnrichmentError`] and
/// [`NotificationError`] through the run report instead; those two only reach
/// this enum when the stage cannot be built.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid window: {0}")]
    Window(#[from] InvalidWindow),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Enrichment setup error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Notifier setup error: {0}")]
    Notification(#[from] NotificationError),
}

impl PipelineError {
    /// Short error category used for the one-line operator summary.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_)
            | PipelineError::Window(_)
            | PipelineError::Enrichment(_)
            | PipelineError::Notification(_) => "ConfigurationError",
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Storage(_) => "StorageError",
        }
    }
}

/// Errors raised while resolving configuration, before any network call
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<&'static str>),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// A query window whose start is not before its end
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("start {start} must be before end {end}")]
pub struct InvalidWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Errors from the attribution API
#[derive(Error, Debug)]
pub enum FetchError {
    /// 401/403: the API key is wrong or lacks access.
    #[error("attribution API rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Any other 4xx except 429: the request itself is wrong.
    #[error("attribution API rejected request ({status}): {message}")]
    Configuration { status: u16, message: String },

    /// 429, 5xx, or no response at all. `status` is `None` for transport failures.
    #[error("attribution API unavailable{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    #[error("attribution API still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("malformed attribution response: {0}")]
    Decode(String),

    #[error("invalid attribution request: {0}")]
    InvalidRequest(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Map a non-success HTTP status to the matching error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => FetchError::Auth { status, message },
            429 => FetchError::Upstream {
                status: Some(status),
                message,
            },
            400..=499 => FetchError::Configuration { status, message },
            _ => FetchError::Upstream {
                status: Some(status),
                message,
            },
        }
    }

    /// Whether the same request may succeed after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Upstream { .. })
    }

    /// Short error category used for the one-line operator summary.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Auth { .. } => "AuthError",
            FetchError::Configuration { .. }
            | FetchError::InvalidRequest(_)
            | FetchError::Client(_) => "ConfigurationError",
            FetchError::Upstream { .. }
            | FetchError::RetriesExhausted { .. }
            | FetchError::Decode(_) => "UpstreamError",
        }
    }
}

/// Errors from the warehouse sink or the run state store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("warehouse request failed: {0}")]
    Request(String),

    #[error("warehouse rejected write ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("warehouse job did not finish: {0}")]
    Incomplete(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("state file {path}: {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    StateFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Model call failures; the enrichment stage is skipped when one occurs
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("model call failed: {0}")]
    Model(#[from] flowlens_models::Error),

    #[error("failed to render prompt: {0}")]
    Render(#[from] serde_json::Error),
}

/// Errors related to channel notifications
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),

    #[error("Channel API rejected message ({status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vars_lists_every_name() {
        let err = ConfigError::MissingVars(vec!["GBQ_URI", "TELEGRAM_TOKEN"]);
        assert_eq!(
            err.to_string(),
            "missing required environment variables: GBQ_URI, TELEGRAM_TOKEN"
        );
    }

    #[test]
    fn status_mapping_follows_retry_policy() {
        assert!(matches!(
            FetchError::from_status(401, "no"),
            FetchError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            FetchError::from_status(403, "no"),
            FetchError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            FetchError::from_status(404, "no"),
            FetchError::Configuration { status: 404, .. }
        ));
        assert!(FetchError::from_status(429, "slow down").is_retryable());
        assert!(FetchError::from_status(502, "bad gateway").is_retryable());
        assert!(!FetchError::from_status(400, "bad").is_retryable());
    }

    #[test]
    fn upstream_display_includes_status_when_known() {
        let err = FetchError::Upstream {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "attribution API unavailable (503): unavailable");

        let err = FetchError::Upstream {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "attribution API unavailable: connection refused");
    }

    #[test]
    fn pipeline_error_kinds() {
        let auth: PipelineError = FetchError::from_status(401, "bad key").into();
        assert_eq!(auth.kind(), "AuthError");

        let config: PipelineError = ConfigError::MissingVars(vec!["GBQ_URI"]).into();
        assert_eq!(config.kind(), "ConfigurationError");

        let exhausted: PipelineError = FetchError::RetriesExhausted {
            attempts: 5,
            last: Box::new(FetchError::from_status(429, "slow down")),
        }
        .into();
        assert_eq!(exhausted.kind(), "UpstreamError");

        let storage: PipelineError = StorageError::Incomplete("job-1".to_string()).into();
        assert_eq!(storage.kind(), "StorageError");
    }

    #[test]
    fn client_build_failures_stop_the_run_as_configuration_errors() {
        let fetch: PipelineError = FetchError::Client("no TLS backend".to_string()).into();
        assert_eq!(fetch.kind(), "ConfigurationError");
        assert!(fetch.to_string().contains("failed to build HTTP client"));

        let notify: PipelineError = NotificationError::Client("no TLS backend".to_string()).into();
        assert_eq!(notify.kind(), "ConfigurationError");

        let enrich: PipelineError = EnrichmentError::Model(flowlens_models::Error::Request(
            "failed to build HTTP client: no TLS backend".to_string(),
        ))
        .into();
        assert_eq!(enrich.kind(), "ConfigurationError");
        assert!(enrich.to_string().contains("Enrichment setup error"));
    }

    #[test]
    fn pipeline_error_display_keeps_context() {
        let err: PipelineError = StorageError::Rejected {
            status: 403,
            message: "Access Denied".to_string(),
        }
        .into();
        assert!(err.to_string().contains("Storage error"));
        assert!(err.to_string().contains("Access Denied"));
    }
}
