//! Error types for the notification pipeline.
//!
//! Errors only surface at the seams (transport, backend, config loading).
//! The store, connection manager and poller log and swallow them.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Malformed notification: {0}")]
    MalformedRecord(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Request(e.to_string())
    }
}

#[cfg(feature = "websocket")]
impl From<tungstenite::Error> for SyncError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                SyncError::ChannelClosed
            }
            other => SyncError::Transport(other.to_string()),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
