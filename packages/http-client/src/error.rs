//! Error types for the HTTP client

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur when calling the gateway over HTTP
#[derive(Error, Debug)]
pub enum HttpError {
    /// Process is known to be offline
    #[error("No network connection available")]
    Connectivity,

    /// Non-transient 4xx response
    #[error("Client error: status {status}: {body}")]
    Client { status: u16, body: String },

    /// 5xx response
    #[error("Server error: status {status}")]
    Server { status: u16 },

    /// 408 response
    #[error("Request timed out on the server (status 408)")]
    RequestTimeout,

    /// Failure below the HTTP layer
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Status outside the classes the client knows how to handle
    #[error("Unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    /// Credentials were rejected and could not be renewed
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Refresh was required but no refresh token is stored
    #[error("Refresh token is empty")]
    MissingRefreshToken,

    /// No stored session to authorize the request with
    #[error("No stored session credentials")]
    NotAuthenticated,

    /// Retries exhausted without any recorded failure
    #[error("Request failed for an unknown reason")]
    Unknown,

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to serialize/deserialize JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned row could not be decoded into an event
    #[error("Decode error: {0}")]
    Decode(#[from] tandem_realtime_client::RealtimeError),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(String),
}

impl HttpError {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Server { .. } | HttpError::RequestTimeout => true,
            HttpError::Transport(e) => !e.is_terminal(),
            _ => false,
        }
    }

    /// Check if the caller should re-authenticate
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            HttpError::Authorization(_)
                | HttpError::MissingRefreshToken
                | HttpError::NotAuthenticated
        )
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::Store(err.to_string())
    }
}

/// Result type for HTTP operations
pub type HttpResult<T> = Result<T, HttpError>;
