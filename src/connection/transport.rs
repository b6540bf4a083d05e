//! Seam between the connection state machine and the wire.

use crate::error::Result;
use std::time::Duration;

/// Outcome of one bounded read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One text payload from the server.
    Message(String),
    /// Nothing arrived within the timeout (or only control frames did).
    Idle,
    /// The peer closed the channel.
    Closed,
}

/// An open bidirectional channel. Owned by the connection worker thread.
pub trait Channel: Send {
    /// Wait at most `timeout` for the next event. An `Err` means the
    /// channel is broken and will be dropped.
    fn recv(&mut self, timeout: Duration) -> Result<ChannelEvent>;

    /// Close politely. Errors are ignored; the channel is dropped next.
    fn close(&mut self);
}

/// Opens channels. Called from the connection worker thread; may block up
/// to its own handshake timeout.
pub trait Transport: Send + Sync {
    fn open(&self) -> Result<Box<dyn Channel>>;

    /// Short name for logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}
