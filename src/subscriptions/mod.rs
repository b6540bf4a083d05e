//! Subscription system for live updates.
//!
//! This module provides in-process fan-out used by:
//! - the inbox (snapshots after every change)
//! - the connection manager (state transitions and inbound messages)
//!
//! Subscriptions support:
//! - Synchronous callbacks or bounded channels
//! - An initial event delivered at subscribe time
//! - Per-subscriber ordering by sequence number
//! - Slow-subscriber dropping for channels
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::<u64>::new();
//!
//! let handle = manager.subscribe(|count| println!("unread: {count}"), 0, &0);
//! manager.broadcast(1, &3);
//!
//! // Dropping the handle unsubscribes.
//! drop(handle);
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChannelSubscription, DropReason, SubscriptionConfig, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId,
};
