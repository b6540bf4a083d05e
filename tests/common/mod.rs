//! In-memory backend, transport and navigator shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use notification_sync::{
    Channel, ChannelEvent, Navigator, NotificationBackend, NotificationId, NotificationRecord,
    Receipt, Result, SyncError, Transport,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + ChronoDuration::minutes(minute)
}

pub fn contract(id: &str, minute: i64) -> NotificationRecord {
    NotificationRecord::new(id, "contract_signed", at(minute))
        .with_data("contractId", format!("C-{id}"))
        .with_data("companyName", "Nile Motors")
}

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `done` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

// --- Backend ---

/// Serves whatever `set_server` was last given. Receipts are recorded, not
/// applied, so the server can lag behind the client.
#[derive(Default)]
pub struct FakeBackend {
    server: Mutex<Vec<NotificationRecord>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
    since: Mutex<Vec<Option<DateTime<Utc>>>>,
    receipts: Mutex<Vec<Receipt>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn set_server(&self, records: Vec<NotificationRecord>) {
        *self.server.lock() = records;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn since_history(&self) -> Vec<Option<DateTime<Utc>>> {
        self.since.lock().clone()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().clone()
    }
}

impl NotificationBackend for FakeBackend {
    fn fetch_notifications(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NotificationRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.since.lock().push(since);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                endpoint: "/notifications".to_string(),
                status: 503,
            });
        }
        let records = self.server.lock().clone();
        Ok(match since {
            Some(since) => records.into_iter().filter(|r| r.created_at > since).collect(),
            None => records,
        })
    }

    fn mark_read(&self, id: &NotificationId) -> Result<()> {
        self.receipts.lock().push(Receipt::Read(id.clone()));
        Ok(())
    }

    fn mark_all_read(&self) -> Result<()> {
        self.receipts.lock().push(Receipt::ReadAll);
        Ok(())
    }
}

// --- Navigator ---

#[derive(Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) {
        self.visited.lock().push(url.to_string());
    }
}

// --- Transport ---

/// What the fake server sends down an open channel.
pub enum ServerFrame {
    Text(String),
    Close,
}

enum Scripted {
    Refuse,
    Accept(Receiver<ServerFrame>),
    /// Handshake blocks until the gate fires (or its sender drops).
    Gated(Receiver<()>, Receiver<ServerFrame>),
}

/// Scripted transport: each `open` consumes the next scripted outcome and
/// refuses once the script is empty.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Scripted>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn refuse(&self) {
        self.script.lock().push_back(Scripted::Refuse);
    }

    /// Queue a successful open; returns the server end of the channel.
    pub fn accept(&self) -> Sender<ServerFrame> {
        let (tx, rx) = unbounded();
        self.script.lock().push_back(Scripted::Accept(rx));
        tx
    }

    /// Queue an open whose handshake completes only when the returned gate
    /// is signalled.
    pub fn accept_gated(&self) -> (Sender<()>, Sender<ServerFrame>) {
        let (gate_tx, gate_rx) = bounded(1);
        let (tx, rx) = unbounded();
        self.script.lock().push_back(Scripted::Gated(gate_rx, rx));
        (gate_tx, tx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn open(&self) -> Result<Box<dyn Channel>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        let frames = match next {
            None | Some(Scripted::Refuse) => {
                return Err(SyncError::Transport("connection refused".to_string()))
            }
            Some(Scripted::Accept(frames)) => frames,
            Some(Scripted::Gated(gate, frames)) => {
                let _ = gate.recv();
                frames
            }
        };
        Ok(Box::new(FakeChannel {
            frames,
            closes: Arc::clone(&self.closes),
        }))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

struct FakeChannel {
    frames: Receiver<ServerFrame>,
    closes: Arc<AtomicUsize>,
}

impl Channel for FakeChannel {
    fn recv(&mut self, timeout: Duration) -> Result<ChannelEvent> {
        match self.frames.recv_timeout(timeout) {
            Ok(ServerFrame::Text(text)) => Ok(ChannelEvent::Message(text)),
            Ok(ServerFrame::Close) | Err(RecvTimeoutError::Disconnected) => Ok(ChannelEvent::Closed),
            Err(RecvTimeoutError::Timeout) => Ok(ChannelEvent::Idle),
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
