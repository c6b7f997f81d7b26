//! Error types for upstream collaborators.

use std::time::Duration;
use thiserror::Error;

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Failure talking to the broker. Every variant counts as "upstream
/// unavailable": callers back off and retry, they never crash.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("{endpoint} request timed out after {after:?}")]
    Timeout { endpoint: &'static str, after: Duration },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} backing off after failures, retry in {retry_in:?}")]
    BackingOff {
        endpoint: &'static str,
        retry_in: Duration,
    },

    #[error("Failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("Feed connection closed")]
    Closed,
}

impl UpstreamError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Unavailable(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for UpstreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => UpstreamError::Closed,
            other => UpstreamError::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Decode(err.to_string())
    }
}
