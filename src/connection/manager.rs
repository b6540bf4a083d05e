use super::backoff::Backoff;
use super::transport::{Channel, ChannelEvent, Transport};
use super::{ConnectionEvent, ConnectionState, ConnectionStatus};
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::subscriptions::{
    ChannelSubscription, SubscriptionConfig, SubscriptionHandle, SubscriptionManager,
};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

struct Inner {
    state: ConnectionState,
    message_count: u64,
    backoff: Backoff,
    gave_up: bool,
    /// `connect()` arrived while Closing.
    pending_connect: bool,
    shut_down: bool,
    /// Identifies the current worker. Transitions from any other worker
    /// are ignored.
    generation: u64,
    /// Dropping it cancels the current worker.
    cancel: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            message_count: self.message_count,
            reconnect_attempt: self.backoff.attempt(),
            gave_up: self.gave_up,
        }
    }

    fn owns(&self, generation: u64, state: ConnectionState) -> bool {
        self.generation == generation && self.state == state
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    receive_slice: Duration,
    inner: Mutex<Inner>,
    events: SubscriptionManager<ConnectionEvent>,
    /// Held across each transition and its broadcast so subscribers see
    /// events in the order they happened. Re-entrant so a subscriber may
    /// call `connect`/`disconnect`.
    emit_lock: ReentrantMutex<()>,
    seq: AtomicU64,
}

/// Why a receive loop ended.
enum ChannelEnd {
    Cancelled,
    Lost,
}

/// Owns the push channel and its state machine.
///
/// `connect` and `disconnect` never block on I/O and never fail; the
/// handshake and receive loop run on a worker thread, one per connect
/// cycle.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy, receive_slice: Duration) -> Self {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            message_count: 0,
            backoff: Backoff::new(&policy),
            gave_up: false,
            pending_connect: false,
            shut_down: false,
            generation: 0,
            cancel: None,
            workers: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                transport,
                receive_slice: receive_slice.max(Duration::from_millis(1)),
                inner: Mutex::new(inner),
                events: SubscriptionManager::new(),
                emit_lock: ReentrantMutex::new(()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &SyncConfig) -> Self {
        Self::new(transport, config.reconnect.clone(), config.receive_slice())
    }

    /// Open the channel. No-op while Connecting or Connected. While Closing
    /// the request is remembered and honoured once Disconnected. Also cuts
    /// short a pending backoff wait and clears `gave_up`.
    pub fn connect(&self) {
        Shared::connect(&self.shared);
    }

    /// Close the channel and stop reconnecting. Converges to Disconnected;
    /// a handshake in flight is closed when it resolves.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.inner.lock().status()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn message_count(&self) -> u64 {
        self.shared.inner.lock().message_count
    }

    /// Register `callback` for status changes and messages. It receives the
    /// current status immediately.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let _emit = self.shared.emit_lock.lock();
        let (seq, current) = self.shared.current_event();
        self.shared.events.subscribe(callback, seq, &current)
    }

    pub fn subscribe_channel(&self, config: SubscriptionConfig) -> ChannelSubscription<ConnectionEvent> {
        let _emit = self.shared.emit_lock.lock();
        let (seq, current) = self.shared.current_event();
        self.shared.events.subscribe_channel(config, seq, &current)
    }

    /// Disconnect, refuse further connects and wait for worker threads.
    pub fn shutdown(&self) {
        let workers = {
            let _emit = self.shared.emit_lock.lock();
            self.shared.inner.lock().shut_down = true;
            self.shared.disconnect();
            std::mem::take(&mut self.shared.inner.lock().workers)
        };

        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Connection worker panicked");
            }
        }
        debug!("Connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn current_event(&self) -> (u64, ConnectionEvent) {
        let status = self.inner.lock().status();
        (self.seq.load(Ordering::SeqCst), ConnectionEvent::StateChanged(status))
    }

    /// Caller must hold `emit_lock`.
    fn emit(&self, event: ConnectionEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.broadcast(seq, &event);
    }

    fn emit_status(&self, status: ConnectionStatus) {
        trace!(state = %status.state, attempt = status.reconnect_attempt, "Connection status");
        self.emit(ConnectionEvent::StateChanged(status));
    }

    fn connect(this: &Arc<Self>) {
        let _emit = this.emit_lock.lock();
        let status = {
            let mut inner = this.inner.lock();
            if inner.shut_down {
                debug!("connect() after shutdown ignored");
                return;
            }
            match inner.state {
                ConnectionState::Connecting | ConnectionState::Connected => return,
                ConnectionState::Closing => {
                    debug!("connect() while closing; reconnecting once closed");
                    inner.pending_connect = true;
                    return;
                }
                ConnectionState::Disconnected => {}
            }

            // Supersede any worker still waiting out a backoff.
            inner.generation += 1;
            let (cancel_tx, cancel_rx) = bounded::<()>(0);
            inner.cancel = Some(cancel_tx);
            inner.backoff.reset();
            inner.gave_up = false;
            inner.state = ConnectionState::Connecting;
            inner.workers.retain(|worker| !worker.is_finished());

            let generation = inner.generation;
            let worker_shared = Arc::clone(this);
            let spawned = thread::Builder::new()
                .name("notification-channel".into())
                .spawn(move || worker_shared.run(generation, cancel_rx));
            match spawned {
                Ok(worker) => inner.workers.push(worker),
                Err(e) => {
                    warn!(error = %e, "Could not spawn connection worker");
                    inner.state = ConnectionState::Disconnected;
                    inner.cancel = None;
                }
            }
            inner.status()
        };

        info!(transport = %this.transport.describe(), "Connecting");
        this.emit_status(status);
    }

    fn disconnect(&self) {
        let _emit = self.emit_lock.lock();
        let status = {
            let mut inner = self.inner.lock();
            inner.pending_connect = false;
            match inner.state {
                ConnectionState::Disconnected => {
                    // A worker may be sleeping before a retry.
                    if inner.cancel.take().is_some() {
                        inner.generation += 1;
                        debug!("Reconnect cancelled");
                    }
                    return;
                }
                ConnectionState::Closing => return,
                ConnectionState::Connecting | ConnectionState::Connected => {
                    inner.state = ConnectionState::Closing;
                    inner.cancel = None;
                    inner.status()
                }
            }
        };

        info!("Disconnecting");
        self.emit_status(status);
    }

    // --- Worker side ---

    fn run(self: Arc<Self>, generation: u64, cancel: Receiver<()>) {
        loop {
            match self.transport.open() {
                Ok(mut channel) => {
                    let end = if self.opened(generation) {
                        self.receive(generation, channel.as_mut(), &cancel)
                    } else {
                        ChannelEnd::Cancelled
                    };
                    channel.close();
                    if let ChannelEnd::Lost = end {
                        info!("Channel lost");
                    }
                }
                Err(e) => warn!(error = %e, "Channel open failed"),
            }

            let Some(delay) = self.channel_down(generation) else {
                break;
            };
            debug!(?delay, "Reconnect scheduled");
            match cancel.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            if !self.retry(generation) {
                break;
            }
        }
        trace!(generation, "Connection worker exiting");
    }

    fn opened(&self, generation: u64) -> bool {
        let _emit = self.emit_lock.lock();
        let status = {
            let mut inner = self.inner.lock();
            if !inner.owns(generation, ConnectionState::Connecting) {
                return false;
            }
            inner.state = ConnectionState::Connected;
            inner.message_count = 0;
            inner.backoff.reset();
            inner.gave_up = false;
            inner.status()
        };
        info!("Connected");
        self.emit_status(status);
        true
    }

    fn receive(&self, generation: u64, channel: &mut dyn Channel, cancel: &Receiver<()>) -> ChannelEnd {
        loop {
            if let Err(TryRecvError::Disconnected) = cancel.try_recv() {
                return ChannelEnd::Cancelled;
            }
            match channel.recv(self.receive_slice) {
                Ok(ChannelEvent::Message(payload)) => {
                    if !self.deliver(generation, payload) {
                        return ChannelEnd::Cancelled;
                    }
                }
                Ok(ChannelEvent::Idle) => {}
                Ok(ChannelEvent::Closed) => return ChannelEnd::Lost,
                Err(e) => {
                    warn!(error = %e, "Channel receive failed");
                    return ChannelEnd::Lost;
                }
            }
        }
    }

    /// Count and publish one payload. False if this worker was cancelled, in
    /// which case the payload is discarded.
    fn deliver(&self, generation: u64, payload: String) -> bool {
        let _emit = self.emit_lock.lock();
        let message_count = {
            let mut inner = self.inner.lock();
            if !inner.owns(generation, ConnectionState::Connected) {
                trace!("Discarding payload from cancelled channel");
                return false;
            }
            inner.message_count += 1;
            inner.message_count
        };
        self.emit(ConnectionEvent::Message {
            payload,
            received_at: Utc::now(),
            message_count,
        });
        true
    }

    /// The worker's channel is gone (or never opened). Move to Disconnected
    /// and return the delay before the next attempt, if any.
    fn channel_down(self: &Arc<Self>, generation: u64) -> Option<Duration> {
        let _emit = self.emit_lock.lock();
        let (status, retry, reconnect) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state == ConnectionState::Disconnected {
                return None;
            }

            let closing = inner.state == ConnectionState::Closing;
            inner.state = ConnectionState::Disconnected;
            let retry = if closing {
                inner.cancel = None;
                None
            } else {
                match inner.backoff.next_delay() {
                    Some(delay) => Some(delay),
                    None => {
                        warn!(
                            attempts = inner.backoff.attempt(),
                            "Giving up on the push channel; polling only"
                        );
                        inner.gave_up = true;
                        inner.cancel = None;
                        None
                    }
                }
            };
            let reconnect = std::mem::take(&mut inner.pending_connect);
            (inner.status(), retry, reconnect)
        };

        info!(
            attempt = status.reconnect_attempt,
            gave_up = status.gave_up,
            "Disconnected"
        );
        self.emit_status(status);

        if reconnect {
            Shared::connect(self);
        }
        retry
    }

    /// Backoff elapsed: Disconnected -> Connecting for the same worker.
    fn retry(&self, generation: u64) -> bool {
        let _emit = self.emit_lock.lock();
        let status = {
            let mut inner = self.inner.lock();
            if !inner.owns(generation, ConnectionState::Disconnected) {
                return false;
            }
            inner.state = ConnectionState::Connecting;
            inner.status()
        };
        debug!(attempt = status.reconnect_attempt, "Reconnecting");
        self.emit_status(status);
        true
    }
}
