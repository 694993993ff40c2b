use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

/// Error type shared by every layer of the engine.
///
/// The type is `Clone` so that one failed network round trip can be handed to every
/// caller that was coalesced onto it.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SyncError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("Server returned status code {0}")]
    Status(StatusCode),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed payload: {0}")]
    Validation(String),

    #[error("Download URL unavailable: {0}")]
    DownloadUrlUnavailable(String),

    #[error("All download strategies failed")]
    TransportExhausted,

    #[error("Strategy not applicable: {0}")]
    NotApplicable(String),

    #[error("Host environment error: {0}")]
    Host(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { .. } | SyncError::Timeout(_) => true,
            SyncError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// Convert a reqwest error raised under a known time budget.
    pub fn from_reqwest(err: reqwest::Error, budget: Duration) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(budget)
        } else {
            SyncError::from(err)
        }
    }

    pub(crate) fn from_status(status: StatusCode, what: impl Into<String>) -> Self {
        if status == StatusCode::NOT_FOUND {
            SyncError::NotFound(what.into())
        } else {
            SyncError::Status(status)
        }
    }
}

// Manual implementation because of the Arc wrapping. Without a known budget a timeout
// stays a network error; see `SyncError::from_reqwest`.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            return SyncError::from_status(status, url);
        }
        SyncError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Validation(err.to_string())
    }
}
