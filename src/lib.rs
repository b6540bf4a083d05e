//! # Notification Sync
//!
//! A real-time notification inbox fed by a push channel and a polling
//! fallback, with optimistic read-state sync back to the server.
//!
//! ## Core Concepts
//!
//! - **Store**: the in-memory inbox; merges pushed and polled records by id
//! - **Connection**: push channel state machine with bounded reconnect
//! - **Poller**: fixed-interval pull that keeps the inbox fresh when the
//!   channel is down
//! - **Receipts**: background acknowledgement of reads
//!
//! ## Example
//!
//! ```ignore
//! use notification_sync::{NotificationService, SyncConfig};
//!
//! let service = NotificationService::connect(
//!     SyncConfig {
//!         base_url: "http://localhost:5000/api/v1".into(),
//!         ws_url: Some("ws://localhost:5000/ws".into()),
//!         ..Default::default()
//!     },
//!     None,
//!     navigator,
//! )?;
//!
//! let _badge = service.store().subscribe(|inbox| {
//!     println!("{} unread", inbox.unread_count);
//! });
//! ```

pub mod backend;
pub mod config;
pub mod connection;
pub mod decode;
pub mod error;
pub mod poller;
pub mod receipts;
pub mod resolver;
pub mod service;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
#[cfg(feature = "http")]
pub use backend::HttpBackend;
pub use backend::{NotificationBackend, TokenProvider};
pub use config::{PollMode, ReconnectPolicy, SyncConfig};
#[cfg(feature = "websocket")]
pub use connection::WebSocketTransport;
pub use connection::{
    Backoff, Channel, ChannelEvent, ConnectionEvent, ConnectionManager, ConnectionState,
    ConnectionStatus, Transport,
};
pub use decode::{decode_poll_response, decode_push_payload, decode_record, PushPayload};
pub use error::{Result, SyncError};
pub use poller::{PollTick, Poller, PollerHandle};
pub use receipts::{Receipt, ReceiptDispatcher};
pub use resolver::{ActionResolver, Navigator, ResolvedAction, FALLBACK_URL};
pub use service::NotificationService;
pub use store::{LoadOutcome, MergeSummary, NotificationStore};
pub use subscriptions::{
    ChannelSubscription, DropReason, SubscriptionConfig, SubscriptionEvent, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
