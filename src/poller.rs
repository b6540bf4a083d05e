//! Fixed-interval poller running on a dedicated thread.
//!
//! The callback runs on one thread, so it never overlaps itself; ticks that
//! fall due while it is still running are skipped. Callbacks check
//! [`PollTick::is_stopped`] before starting work and apply results through
//! [`PollTick::commit`], which refuses to run once the poller has been
//! stopped.

use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Prevent a zero interval from creating a busy-loop.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct PollShared {
    stopped: AtomicBool,
    /// Held for the duration of a commit; `stop()` takes it to wait one out.
    commit_lock: Mutex<()>,
}

impl PollShared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Passed to the callback on every tick.
pub struct PollTick<'a> {
    shared: &'a PollShared,
    sequence: u64,
}

impl PollTick<'_> {
    /// Tick number, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True once `stop()` was called. Check before starting slow work.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Run `apply` unless the poller was stopped. `stop()` waits for a
    /// commit in progress, so nothing is applied after it returns.
    pub fn commit<R>(&self, apply: impl FnOnce() -> R) -> Option<R> {
        let _commit = self.shared.commit_lock.lock();
        if self.shared.is_stopped() {
            debug!(tick = self.sequence, "Poller stopped; discarding late result");
            return None;
        }
        Some(apply())
    }
}

/// Poller configuration. Call [`Poller::start`] to spawn the thread.
#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
    immediate: bool,
    name: String,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            immediate: false,
            name: "notification-poller".to_string(),
        }
    }

    /// Fire the first tick right away instead of after one interval.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Thread name (for debugging).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the polling thread.
    pub fn start<F>(self, callback: F) -> Result<PollerHandle>
    where
        F: FnMut(&PollTick<'_>) + Send + 'static,
    {
        let shared = Arc::new(PollShared {
            stopped: AtomicBool::new(false),
            commit_lock: Mutex::new(()),
        });
        let (wake_tx, wake_rx) = bounded(1);

        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.run(&thread_shared, wake_rx, callback))?;

        Ok(PollerHandle {
            shared,
            thread: join.thread().id(),
            wake: Some(wake_tx),
            join: Some(join),
        })
    }

    fn run<F>(self, shared: &PollShared, wake: Receiver<()>, mut callback: F)
    where
        F: FnMut(&PollTick<'_>),
    {
        let mut next_due = if self.immediate {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut sequence = 0;

        loop {
            let wait = next_due.saturating_duration_since(Instant::now());
            match wake.recv_timeout(wait) {
                Ok(()) => trace!("Poll requested"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if shared.is_stopped() {
                break;
            }

            sequence += 1;
            let started = Instant::now();
            callback(&PollTick { shared, sequence });

            next_due = started + self.interval;
            let now = Instant::now();
            if next_due <= now {
                let behind = now.duration_since(next_due).as_nanos();
                let skipped = (behind / self.interval.as_nanos()) as u32 + 1;
                debug!(tick = sequence, skipped, "Poll overran its interval; skipping ticks");
                next_due += self.interval * skipped;
            }
        }

        debug!(poller = %self.name, "Poller exiting");
    }
}

/// Handle returned by [`Poller::start`].
pub struct PollerHandle {
    shared: Arc<PollShared>,
    thread: ThreadId,
    wake: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Run a tick now (coalesced with any request already pending).
    pub fn poll_now(&self) {
        if let Some(wake) = &self.wake {
            let _ = wake.try_send(());
        }
    }

    /// Stop polling. After this returns no new tick starts, no
    /// [`PollTick::commit`] runs, and a callback that was already entering
    /// sees [`PollTick::is_stopped`]. Does not wait for an in-flight
    /// callback to finish; see [`PollerHandle::join`].
    ///
    /// Safe to call from inside the callback or a commit.
    pub fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if thread::current().id() != self.thread {
            // Wait out a commit that started before the flag was set.
            drop(self.shared.commit_lock.lock());
        }
        // Dropping the sender wakes the thread out of its wait.
        self.wake.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Wait for the thread to exit (call after `stop`). A no-op when called
    /// from the poller thread itself.
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if join.thread().id() == thread::current().id() {
                return;
            }
            let _ = join.join();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
