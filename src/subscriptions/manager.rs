//! Subscription manager for broadcasting events to in-process consumers.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::types::{
    ChannelSubscription, Detach, DropReason, SubscriptionConfig, SubscriptionEvent,
    SubscriptionHandle, SubscriptionId,
};

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

enum Sink<E> {
    Callback(Callback<E>),
    Channel(Sender<SubscriptionEvent<E>>),
}

/// Internal subscription state.
struct Subscription<E> {
    id: SubscriptionId,
    sink: Sink<E>,
    /// One past the highest sequence delivered; 0 = nothing yet.
    delivered: AtomicU64,
}

/// Outcome of a single delivery attempt.
enum Delivery {
    Sent,
    Stale,
    Failed(DropReason),
}

impl<E: Clone> Subscription<E> {
    fn deliver(&self, seq: u64, event: &E) -> Delivery {
        // Events older than what this subscriber already saw are skipped so
        // nested broadcasts never arrive out of order.
        if self.delivered.fetch_max(seq + 1, Ordering::SeqCst) > seq {
            return Delivery::Stale;
        }

        match &self.sink {
            Sink::Callback(callback) => match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Failed(DropReason::Panicked),
            },
            Sink::Channel(sender) => match sender.try_send(SubscriptionEvent::Update(event.clone())) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Full(_)) => Delivery::Failed(DropReason::BufferOverflow),
                Err(TrySendError::Disconnected(_)) => Delivery::Failed(DropReason::Disconnected),
            },
        }
    }

    fn notify_dropped(&self, reason: DropReason) {
        if let Sink::Channel(sender) = &self.sink {
            // Best effort; the buffer may be the reason we are here.
            let _ = sender.try_send(SubscriptionEvent::Dropped { reason });
        }
    }
}

struct Registry<E> {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription<E>>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl<E: Clone + Send + Sync + 'static> Registry<E> {
    fn remove(&self, id: SubscriptionId, reason: DropReason) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            debug!(subscription = %id, ?reason, "Subscription removed");
            sub.notify_dropped(reason);
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Detach for Registry<E> {
    fn detach(&self, id: SubscriptionId) {
        self.remove(id, DropReason::Unsubscribed);
    }
}

/// Manages subscriptions and broadcasts events.
///
/// Callers supply a sequence number with every event; each subscriber sees
/// a strictly increasing sequence, starting with the initial event handed
/// over at subscribe time.
pub struct SubscriptionManager<E> {
    registry: Arc<Registry<E>>,
}

impl<E: Clone + Send + Sync + 'static> SubscriptionManager<E> {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback and hand it `initial` before returning.
    pub fn subscribe<F>(&self, callback: F, seq: u64, initial: &E) -> SubscriptionHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let sub = self.register(Sink::Callback(Box::new(callback)));
        let handle = self.handle_for(sub.id);
        self.deliver_one(&sub, seq, initial);
        handle
    }

    /// Register a bounded channel and queue `initial` on it.
    pub fn subscribe_channel(
        &self,
        config: SubscriptionConfig,
        seq: u64,
        initial: &E,
    ) -> ChannelSubscription<E> {
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let sub = self.register(Sink::Channel(sender));
        let handle = self.handle_for(sub.id);
        self.deliver_one(&sub, seq, initial);
        ChannelSubscription { handle, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.remove(id, DropReason::Unsubscribed);
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.registry.subscriptions.read().len()
    }

    /// Deliver `event` to every subscriber. Drops subscribers that fail to
    /// receive.
    ///
    /// The registry lock is not held while callbacks run, so a callback may
    /// subscribe or unsubscribe.
    pub fn broadcast(&self, seq: u64, event: &E) {
        let targets: Vec<Arc<Subscription<E>>> =
            self.registry.subscriptions.read().values().cloned().collect();

        let mut to_remove = Vec::new();
        for sub in targets {
            if let Delivery::Failed(reason) = sub.deliver(seq, event) {
                to_remove.push((sub.id, reason));
            }
        }

        for (id, reason) in to_remove {
            warn!(subscription = %id, ?reason, "Dropping subscriber");
            self.registry.remove(id, reason);
        }
    }

    fn register(&self, sink: Sink<E>) -> Arc<Subscription<E>> {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::SeqCst));
        let sub = Arc::new(Subscription {
            id,
            sink,
            delivered: AtomicU64::new(0),
        });
        self.registry.subscriptions.write().insert(id, Arc::clone(&sub));
        sub
    }

    fn handle_for(&self, id: SubscriptionId) -> SubscriptionHandle {
        let registry: Arc<dyn Detach> = self.registry.clone();
        let weak: Weak<dyn Detach> = Arc::downgrade(&registry);
        SubscriptionHandle::new(id, weak)
    }

    fn deliver_one(&self, sub: &Subscription<E>, seq: u64, event: &E) {
        if let Delivery::Failed(reason) = sub.deliver(seq, event) {
            warn!(subscription = %sub.id, ?reason, "Dropping subscriber on initial delivery");
            self.registry.remove(sub.id, reason);
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}
