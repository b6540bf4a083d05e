//! Session wiring: one store, one connection, one poller.

use crate::backend::NotificationBackend;
use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, Transport};
use crate::error::Result;
use crate::poller::{Poller, PollerHandle};
use crate::resolver::Navigator;
use crate::store::NotificationStore;
use crate::subscriptions::SubscriptionHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A running notification session.
///
/// Created explicitly per client session; consumers hold `Arc` handles to
/// the store and connection. Poll and push run side by side and feed the
/// same store. Dropping the service shuts it down.
pub struct NotificationService {
    store: Arc<NotificationStore>,
    connection: Option<Arc<ConnectionManager>>,
    poller: Mutex<Option<PollerHandle>>,
    /// Channel messages -> store.
    bridge: Mutex<Option<SubscriptionHandle>>,
}

impl NotificationService {
    /// Start a session. Without a transport the session is poll-only.
    pub fn start(
        config: SyncConfig,
        backend: Arc<dyn NotificationBackend>,
        transport: Option<Arc<dyn Transport>>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(NotificationStore::new(backend, navigator, &config));

        let (connection, bridge) = match transport {
            Some(transport) => {
                let connection = Arc::new(ConnectionManager::from_config(transport, &config));
                let bridge = connection.subscribe(bridge_to(&store));
                if config.connect_on_start {
                    connection.connect();
                }
                (Some(connection), Some(bridge))
            }
            None => (None, None),
        };

        let poll_store = Arc::downgrade(&store);
        let poller = Poller::new(config.poll_interval())
            .immediate(config.poll_on_start)
            .start(move |tick| {
                if let Some(store) = poll_store.upgrade() {
                    store.poll(tick);
                }
            })?;

        info!(
            base_url = %config.base_url,
            push = connection.is_some(),
            poll_interval_ms = config.poll_interval_ms,
            "Notification session started"
        );

        Ok(Self {
            store,
            connection,
            poller: Mutex::new(Some(poller)),
            bridge: Mutex::new(bridge),
        })
    }

    /// Start a session over HTTP and, if `ws_url` is set, a WebSocket.
    #[cfg(all(feature = "http", feature = "websocket"))]
    pub fn connect(
        config: SyncConfig,
        token: Option<Arc<dyn crate::backend::TokenProvider>>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        use crate::backend::HttpBackend;
        use crate::connection::WebSocketTransport;

        let mut backend = HttpBackend::new(&config)?;
        let mut transport = WebSocketTransport::from_config(&config)?;
        if let Some(token) = token {
            backend = backend.with_token_provider(Arc::clone(&token));
            transport = transport.map(|t| t.with_token_provider(token));
        }

        let transport = transport.map(|t| Arc::new(t) as Arc<dyn Transport>);
        Self::start(config, Arc::new(backend), transport, navigator)
    }

    pub fn store(&self) -> Arc<NotificationStore> {
        Arc::clone(&self.store)
    }

    /// None for poll-only sessions.
    pub fn connection(&self) -> Option<Arc<ConnectionManager>> {
        self.connection.clone()
    }

    /// Poll now instead of waiting for the next interval.
    pub fn poll_now(&self) {
        if let Some(poller) = self.poller.lock().as_ref() {
            poller.poll_now();
        }
    }

    /// Stop polling, close the channel and drain pending receipts.
    /// Idempotent.
    ///
    /// May be called from a store subscriber. In a session with a push
    /// channel, a subscriber running on the poller thread must not call it
    /// while a pushed frame is being merged: the channel worker waits for
    /// the store while shutdown waits for the worker.
    pub fn shutdown(&self) {
        let poller = self.poller.lock().take();
        let Some(mut poller) = poller else {
            return;
        };
        poller.stop();
        poller.join();

        if let Some(connection) = &self.connection {
            connection.shutdown();
        }
        self.bridge.lock().take();
        self.store.shutdown();
        debug!("Notification session shut down");
    }
}

impl Drop for NotificationService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bridge_to(store: &Arc<NotificationStore>) -> impl Fn(&ConnectionEvent) + Send + Sync + 'static {
    let store = Arc::downgrade(store);
    move |event: &ConnectionEvent| {
        if let ConnectionEvent::Message {
            payload,
            received_at,
            ..
        } = event
        {
            if let Some(store) = store.upgrade() {
                store.ingest_payload(payload, *received_at);
            }
        }
    }
}
