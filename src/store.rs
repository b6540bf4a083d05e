//! The notification inbox.
//!
//! Single source of truth for notifications delivered by push and by poll.
//! Both paths go through the same merge rule:
//!
//! 1. Unknown id: insert.
//! 2. Known id: replace in place, except a local `read = true` is never
//!    downgraded by an incoming `read = false`.
//! 3. Re-sort newest first and recount unread.
//! 4. One subscriber notification per merge that changed anything.

use crate::backend::NotificationBackend;
use crate::config::{PollMode, SyncConfig};
use crate::decode::{decode_push_payload, PushPayload};
use crate::error::Result;
use crate::poller::PollTick;
use crate::receipts::{Receipt, ReceiptDispatcher};
use crate::resolver::{ActionResolver, Navigator, ResolvedAction};
use crate::subscriptions::{
    ChannelSubscription, SubscriptionConfig, SubscriptionHandle, SubscriptionManager,
};
use crate::types::{InboxSnapshot, NotificationId, NotificationRecord};
use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a merge did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Records the server reports unread although the client already read
    /// them.
    pub stale_reads: Vec<NotificationId>,
}

impl MergeSummary {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

/// Result of one `load_notifications` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Records were inserted or updated; subscribers were notified once.
    Changed(MergeSummary),
    /// The server had nothing new.
    Unchanged,
    /// The request failed; last known state kept.
    Failed,
    /// The poller was stopped before the request or while it was in flight.
    Discarded,
}

/// Inbox contents plus bookkeeping, guarded by the store's RwLock.
struct InboxState {
    /// Newest first, unique ids.
    records: Vec<NotificationRecord>,
    revision: u64,
    /// Newest `created_at` seen, for delta polls.
    cursor: Option<DateTime<Utc>>,
    /// Cached view handed to subscribers; rebuilt on every change.
    snapshot: Arc<InboxSnapshot>,
}

impl InboxState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            revision: 0,
            cursor: None,
            snapshot: Arc::new(InboxSnapshot::default()),
        }
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    fn merge(&mut self, incoming: Vec<NotificationRecord>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut index: HashMap<NotificationId, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        for mut record in collapse(incoming) {
            if !record.created_at_estimated {
                self.cursor = self.cursor.max(Some(record.created_at));
            }

            match index.get(&record.id) {
                None => {
                    index.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                    summary.inserted += 1;
                }
                Some(&i) => {
                    let existing = &self.records[i];
                    // A receive time never replaces an earlier timestamp.
                    if record.created_at_estimated {
                        record.created_at = existing.created_at;
                        record.created_at_estimated = existing.created_at_estimated;
                    }
                    if existing.read && !record.read {
                        record.read = true;
                        summary.stale_reads.push(record.id.clone());
                    }
                    if *existing != record {
                        self.records[i] = record;
                        summary.updated += 1;
                    }
                }
            }
        }

        if summary.changed() {
            self.records.sort_by(NotificationRecord::inbox_order);
        }
        summary
    }

    fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    /// Bump the revision and rebuild the cached snapshot.
    fn publish(&mut self) -> Arc<InboxSnapshot> {
        self.revision += 1;
        self.snapshot = Arc::new(InboxSnapshot {
            records: self.records.clone(),
            unread_count: self.unread_count(),
            revision: self.revision,
        });
        Arc::clone(&self.snapshot)
    }
}

/// One record per id within a batch: the last copy wins, it is read if any
/// copy was, and it keeps a server timestamp if any copy had one.
fn collapse(incoming: Vec<NotificationRecord>) -> Vec<NotificationRecord> {
    let mut records: Vec<NotificationRecord> = Vec::with_capacity(incoming.len());
    let mut index: HashMap<NotificationId, usize> = HashMap::with_capacity(incoming.len());

    for mut record in incoming {
        match index.get(&record.id) {
            Some(&i) => {
                let earlier = &records[i];
                record.read |= earlier.read;
                if record.created_at_estimated && !earlier.created_at_estimated {
                    record.created_at = earlier.created_at;
                    record.created_at_estimated = false;
                }
                records[i] = record;
            }
            None => {
                index.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
    }
    records
}

/// The notification inbox.
///
/// Mutations are applied locally first and acknowledged to the backend in
/// the background. Subscribers run synchronously on the mutating thread,
/// after the state lock is released, so they may read the store or call
/// back into it.
pub struct NotificationStore {
    backend: Arc<dyn NotificationBackend>,
    navigator: Arc<dyn Navigator>,
    resolver: ActionResolver,
    receipts: ReceiptDispatcher,
    poll_mode: PollMode,

    state: RwLock<InboxState>,
    subscriptions: SubscriptionManager<Arc<InboxSnapshot>>,

    /// Serializes mutate-and-notify sequences. Re-entrant so a subscriber
    /// may mutate the store from inside its callback.
    write_lock: ReentrantMutex<()>,
}

impl NotificationStore {
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        navigator: Arc<dyn Navigator>,
        config: &SyncConfig,
    ) -> Self {
        let receipts = ReceiptDispatcher::spawn(Arc::clone(&backend), config.receipt_queue_size);
        Self {
            backend,
            navigator,
            resolver: ActionResolver::new(),
            receipts,
            poll_mode: config.poll_mode,
            state: RwLock::new(InboxState::new()),
            subscriptions: SubscriptionManager::new(),
            write_lock: ReentrantMutex::new(()),
        }
    }

    // --- Subscriptions ---

    /// Register `callback`. It is invoked immediately with the current
    /// snapshot, then once per change. Drop the handle to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&InboxSnapshot) + Send + Sync + 'static,
    {
        let _guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        self.subscriptions.subscribe(
            move |snapshot: &Arc<InboxSnapshot>| callback(snapshot.as_ref()),
            snapshot.revision,
            &snapshot,
        )
    }

    /// Like [`subscribe`](Self::subscribe) but delivers snapshots over a
    /// bounded channel. Slow receivers are dropped.
    pub fn subscribe_channel(
        &self,
        config: SubscriptionConfig,
    ) -> ChannelSubscription<Arc<InboxSnapshot>> {
        let _guard = self.write_lock.lock();
        let snapshot = self.snapshot();
        self.subscriptions
            .subscribe_channel(config, snapshot.revision, &snapshot)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Reads ---

    pub fn snapshot(&self) -> Arc<InboxSnapshot> {
        Arc::clone(&self.state.read().snapshot)
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.state.read().records.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.read().unread_count()
    }

    pub fn get(&self, id: &NotificationId) -> Option<NotificationRecord> {
        let state = self.state.read();
        state.position(id).map(|i| state.records[i].clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    // --- Ingestion ---

    /// Pull from the backend and merge. Errors are logged and swallowed.
    pub fn load_notifications(&self) -> LoadOutcome {
        match self.fetch() {
            Ok(records) => self.apply_poll(records),
            Err(e) => {
                warn!(error = %e, "Loading notifications failed; keeping last known state");
                LoadOutcome::Failed
            }
        }
    }

    /// Poller entry point: like `load_notifications`, but nothing is
    /// fetched once the poller is stopped, and the merge is skipped if it
    /// was stopped while the request was in flight.
    pub fn poll(&self, tick: &PollTick<'_>) -> LoadOutcome {
        if tick.is_stopped() {
            debug!(tick = tick.sequence(), "Poller stopped; skipping fetch");
            return LoadOutcome::Discarded;
        }
        match self.fetch() {
            Ok(records) => tick
                .commit(|| self.apply_poll(records))
                .unwrap_or(LoadOutcome::Discarded),
            Err(e) => {
                warn!(tick = tick.sequence(), error = %e, "Poll failed; keeping last known state");
                LoadOutcome::Failed
            }
        }
    }

    /// Merge one pushed record. Returns true if the inbox changed.
    pub fn ingest(&self, record: NotificationRecord) -> bool {
        self.ingest_batch(vec![record]).changed()
    }

    /// Merge several records with a single subscriber notification.
    pub fn ingest_batch(&self, records: Vec<NotificationRecord>) -> MergeSummary {
        if records.is_empty() {
            return MergeSummary::default();
        }
        let summary = self.merge(records);
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            "Ingested pushed notifications"
        );
        summary
    }

    /// Decode a raw channel frame and merge whatever notifications it holds.
    /// Returns the number of records found in the frame.
    pub fn ingest_payload(&self, payload: &str, received_at: DateTime<Utc>) -> usize {
        match decode_push_payload(payload, received_at) {
            PushPayload::Records(records) => {
                let count = records.len();
                self.ingest_batch(records);
                count
            }
            PushPayload::Ignored(kind) => {
                debug!(kind = %kind, "Channel frame carried no notifications");
                0
            }
        }
    }

    // --- Read state ---

    /// Mark one notification read locally and acknowledge it in the
    /// background. Not rolled back if the acknowledgement fails. Returns
    /// true if the local record changed.
    pub fn mark_as_read(&self, id: &NotificationId) -> bool {
        let found = self.mutate(|state| match state.position(id) {
            Some(i) if !state.records[i].read => {
                state.records[i].read = true;
                (Some(true), true)
            }
            Some(_) => (Some(false), false),
            None => (None, false),
        });

        match found {
            Some(true) => {
                self.receipts.send(Receipt::Read(id.clone()));
                true
            }
            Some(false) => false,
            None => {
                debug!(%id, "mark_as_read for unknown notification; acknowledging anyway");
                self.receipts.send(Receipt::Read(id.clone()));
                false
            }
        }
    }

    /// Mark everything read in one update (one subscriber notification),
    /// then send the bulk acknowledgement. Returns how many records changed.
    pub fn mark_all_as_read(&self) -> usize {
        let marked = self.mutate(|state| {
            let mut marked = 0;
            for record in state.records.iter_mut().filter(|r| !r.read) {
                record.read = true;
                marked += 1;
            }
            (marked, marked > 0)
        });

        info!(marked, "Marked all notifications read");
        self.receipts.send(Receipt::ReadAll);
        marked
    }

    /// Open a notification: mark it read if needed, then navigate to its
    /// resolved route. Returns the resolved display data.
    pub fn handle_action(&self, record: &NotificationRecord) -> ResolvedAction {
        let action = self.resolver.resolve(record);

        let already_read = self
            .get(&record.id)
            .map(|current| current.read)
            .unwrap_or(record.read);
        if !already_read {
            self.mark_as_read(&record.id);
        }

        debug!(id = %record.id, url = %action.action_url, "Opening notification");
        self.navigator.navigate(&action.action_url);
        action
    }

    /// Display data for a record without side effects.
    pub fn resolve(&self, record: &NotificationRecord) -> ResolvedAction {
        self.resolver.resolve(record)
    }

    // --- Lifecycle ---

    /// Wait until queued read receipts were attempted.
    pub fn flush_receipts(&self) {
        self.receipts.flush();
    }

    /// Stop the receipts worker after draining it.
    pub fn shutdown(&self) {
        self.receipts.shutdown();
    }

    // --- Internals ---

    fn fetch(&self) -> Result<Vec<NotificationRecord>> {
        let since = match self.poll_mode {
            PollMode::Full => None,
            PollMode::Delta => self.state.read().cursor,
        };
        self.backend.fetch_notifications(since)
    }

    fn apply_poll(&self, records: Vec<NotificationRecord>) -> LoadOutcome {
        let fetched = records.len();
        let summary = self.merge(records);

        // The server has not seen our read yet (or lost it); ask again.
        for id in &summary.stale_reads {
            self.receipts.send(Receipt::Read(id.clone()));
        }

        if summary.changed() {
            debug!(
                fetched,
                inserted = summary.inserted,
                updated = summary.updated,
                "Poll merged"
            );
            LoadOutcome::Changed(summary)
        } else {
            LoadOutcome::Unchanged
        }
    }

    fn merge(&self, records: Vec<NotificationRecord>) -> MergeSummary {
        self.mutate(|state| {
            let summary = state.merge(records);
            let changed = summary.changed();
            (summary, changed)
        })
    }

    /// Apply `f` and, if it reports a change, notify subscribers once.
    fn mutate<R>(&self, f: impl FnOnce(&mut InboxState) -> (R, bool)) -> R {
        let _guard = self.write_lock.lock();

        let (result, published) = {
            let mut state = self.state.write();
            let (result, changed) = f(&mut state);
            let published = changed.then(|| state.publish());
            (result, published)
        };

        if let Some(snapshot) = published {
            self.subscriptions.broadcast(snapshot.revision, &snapshot);
        }
        result
    }
}

impl Drop for NotificationStore {
    fn drop(&mut self) {
        self.receipts.shutdown();
    }
}
