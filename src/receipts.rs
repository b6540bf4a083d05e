//! Fire-and-forget delivery of read receipts.
//!
//! Store mutations are applied locally first; the matching backend call is
//! queued here and executed on a single worker thread. Failures are logged
//! and dropped, the next poll reconciles.

use crate::backend::NotificationBackend;
use crate::types::NotificationId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A pending backend acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Receipt {
    Read(NotificationId),
    ReadAll,
}

enum Job {
    Send(Receipt),
    Flush(Sender<()>),
}

/// Owns the receipts worker thread.
pub struct ReceiptDispatcher {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReceiptDispatcher {
    /// Spawn the worker. `queue_size` bounds pending receipts.
    pub fn spawn(backend: Arc<dyn NotificationBackend>, queue_size: usize) -> Self {
        let (sender, receiver) = bounded(queue_size.max(1));
        let worker = thread::Builder::new()
            .name("notification-receipts".into())
            .spawn(move || run(backend, receiver));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Could not spawn receipts worker; receipts disabled");
                None
            }
        };
        let sender = worker.as_ref().map(|_| sender);

        Self {
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        }
    }

    /// Queue a receipt. Never blocks; a full queue drops the receipt.
    pub fn send(&self, receipt: Receipt) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            debug!(?receipt, "Receipts worker stopped; dropping receipt");
            return;
        };
        match sender.try_send(Job::Send(receipt)) {
            Ok(()) => {}
            Err(TrySendError::Full(Job::Send(receipt))) => {
                warn!(?receipt, "Receipt queue full; dropping receipt");
            }
            Err(_) => debug!("Receipts worker gone"),
        }
    }

    /// Block until every receipt queued before this call was attempted.
    pub fn flush(&self) {
        let Some(sender) = self.sender.lock().clone() else {
            return;
        };
        let (done_tx, done_rx) = bounded(1);
        if sender.send(Job::Flush(done_tx)).is_err() {
            return;
        }
        drop(sender);
        let _ = done_rx.recv();
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(&self) {
        // Dropping the sender ends the worker loop once the queue is empty.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ReceiptDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(backend: Arc<dyn NotificationBackend>, receiver: Receiver<Job>) {
    for job in receiver {
        match job {
            Job::Send(receipt) => {
                let result = match &receipt {
                    Receipt::Read(id) => backend.mark_read(id),
                    Receipt::ReadAll => backend.mark_all_read(),
                };
                match result {
                    Ok(()) => debug!(?receipt, "Receipt delivered"),
                    Err(e) => warn!(?receipt, error = %e, "Receipt failed"),
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Receipts worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use crate::types::NotificationRecord;
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Receipt>>,
        fail: bool,
    }

    impl NotificationBackend for Recording {
        fn fetch_notifications(&self, _: Option<DateTime<Utc>>) -> Result<Vec<NotificationRecord>> {
            Ok(vec![])
        }

        fn mark_read(&self, id: &NotificationId) -> Result<()> {
            self.calls.lock().push(Receipt::Read(id.clone()));
            if self.fail {
                return Err(SyncError::Request("offline".to_string()));
            }
            Ok(())
        }

        fn mark_all_read(&self) -> Result<()> {
            self.calls.lock().push(Receipt::ReadAll);
            Ok(())
        }
    }

    #[test]
    fn test_receipts_delivered_in_order() {
        let backend = Arc::new(Recording::default());
        let dispatcher = ReceiptDispatcher::spawn(backend.clone(), 16);

        dispatcher.send(Receipt::Read("a".into()));
        dispatcher.send(Receipt::ReadAll);
        dispatcher.flush();

        assert_eq!(
            *backend.calls.lock(),
            vec![Receipt::Read("a".into()), Receipt::ReadAll]
        );
    }

    #[test]
    fn test_failures_do_not_stop_worker() {
        let backend = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let dispatcher = ReceiptDispatcher::spawn(backend.clone(), 16);

        dispatcher.send(Receipt::Read("a".into()));
        dispatcher.send(Receipt::Read("b".into()));
        dispatcher.flush();

        assert_eq!(backend.calls.lock().len(), 2);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let backend = Arc::new(Recording::default());
        let dispatcher = ReceiptDispatcher::spawn(backend.clone(), 16);

        dispatcher.send(Receipt::ReadAll);
        dispatcher.shutdown();
        dispatcher.send(Receipt::ReadAll);

        assert_eq!(*backend.calls.lock(), vec![Receipt::ReadAll]);
    }
}
