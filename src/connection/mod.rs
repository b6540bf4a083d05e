//! Push channel lifecycle.
//!
//! [`ConnectionManager`] owns the connection-state machine and the worker
//! thread that drives a [`Transport`]. Everything it observes is published
//! as [`ConnectionEvent`]s through the shared subscription manager.

mod backoff;
mod manager;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use backoff::Backoff;
pub use manager::ConnectionManager;
pub use transport::{Channel, ChannelEvent, Transport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle state of the push channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the connection, for status indicators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Messages received since the channel was last established.
    pub message_count: u64,
    /// Consecutive failed attempts since the last successful connect.
    pub reconnect_attempt: u32,
    /// True once reconnection stopped; cleared by the next `connect()`.
    pub gave_up: bool,
}

/// Emitted to connection subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionStatus),
    Message {
        payload: String,
        received_at: DateTime<Utc>,
        /// Count including this message.
        message_count: u64,
    },
}
