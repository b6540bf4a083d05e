//! Subscription types shared by the inbox and the connection manager.

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Callback panicked while handling an event.
    Panicked,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Item delivered to channel subscribers.
#[derive(Clone, Debug)]
pub enum SubscriptionEvent<E> {
    Update(E),
    Dropped { reason: DropReason },
}

pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId);
}

/// Deregisters its subscription when dropped or unsubscribed.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    registry: Option<Weak<dyn Detach>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, registry: Weak<dyn Detach>) -> Self {
        Self {
            id,
            registry: Some(registry),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.detach(self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}

/// Channel-backed subscription.
pub struct ChannelSubscription<E> {
    pub handle: SubscriptionHandle,
    /// Channel to receive events.
    pub receiver: Receiver<SubscriptionEvent<E>>,
}

impl<E> ChannelSubscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SubscriptionEvent<E>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SubscriptionEvent<E>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<SubscriptionEvent<E>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
