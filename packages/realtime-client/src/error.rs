//! Error types for the realtime client

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur on the realtime channel
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Gateway endpoint cannot be turned into a socket URL
    #[error("invalid gateway endpoint: {0}")]
    InvalidEndpoint(String),

    /// Socket-level send/receive failure
    #[error("websocket transport error: {0}")]
    Transport(Box<tungstenite::Error>),

    /// Gateway closed the socket or the stream ended
    #[error("socket closed by gateway")]
    ConnectionClosed,

    /// Frame could not be encoded or decoded as JSON
    #[error("frame JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record is missing required fields or has wrong types
    #[error("malformed record: {0}")]
    Parse(String),

    /// Event content is not valid base64
    #[error("invalid base64 content: {0}")]
    Content(#[from] base64::DecodeError),
}

impl From<tungstenite::Error> for RealtimeError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;
