//! Inbox invariants under arbitrary interleavings of push, poll and reads.

mod common;

use common::{at, FakeBackend, RecordingNavigator};
use notification_sync::{NotificationRecord, NotificationStore, SyncConfig};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Clone, Debug)]
enum Op {
    Push { id: u8, minute: i64, read: bool },
    Poll(Vec<(u8, i64, bool)>),
    MarkRead(u8),
    MarkAllRead,
}

fn record(id: u8, minute: i64, read: bool) -> NotificationRecord {
    NotificationRecord::new(format!("n{id}"), "lead_assigned", at(minute))
        .with_data("leadId", id as i64)
        .with_read(read)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..10, 0i64..30, any::<bool>()).prop_map(|(id, minute, read)| Op::Push { id, minute, read }),
        2 => prop::collection::vec((0u8..10, 0i64..30, any::<bool>()), 0..8).prop_map(Op::Poll),
        2 => (0u8..10).prop_map(Op::MarkRead),
        1 => Just(Op::MarkAllRead),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn inbox_invariants_hold(ops in prop::collection::vec(op(), 1..40)) {
        let backend = FakeBackend::new();
        let store = NotificationStore::new(backend.clone(), RecordingNavigator::new(), &SyncConfig::default());
        let mut read_locally: HashSet<String> = HashSet::new();

        for op in ops {
            match op {
                Op::Push { id, minute, read } => {
                    store.ingest(record(id, minute, read));
                }
                Op::Poll(entries) => {
                    backend.set_server(entries.into_iter().map(|(id, m, r)| record(id, m, r)).collect());
                    store.load_notifications();
                }
                Op::MarkRead(id) => {
                    store.mark_as_read(&format!("n{id}").into());
                }
                Op::MarkAllRead => {
                    store.mark_all_as_read();
                }
            }

            let snapshot = store.snapshot();

            // One entry per id.
            let ids: HashSet<_> = snapshot.records.iter().map(|r| r.id.to_string()).collect();
            prop_assert_eq!(ids.len(), snapshot.records.len());

            // Unread count is always a recount.
            let unread = snapshot.records.iter().filter(|r| !r.read).count();
            prop_assert_eq!(snapshot.unread_count, unread);
            prop_assert_eq!(store.unread_count(), unread);

            // Newest first.
            for pair in snapshot.records.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }

            // Once read, always read.
            for id in &read_locally {
                let record = store.get(&id.as_str().into());
                prop_assert!(record.map(|r| r.read).unwrap_or(false), "{} lost its read flag", id);
            }
            read_locally.extend(snapshot.records.iter().filter(|r| r.read).map(|r| r.id.to_string()));
        }
    }

    #[test]
    fn repeated_poll_is_idempotent(entries in prop::collection::vec((0u8..10, 0i64..30, any::<bool>()), 0..12)) {
        let backend = FakeBackend::new();
        let store = NotificationStore::new(backend.clone(), RecordingNavigator::new(), &SyncConfig::default());
        backend.set_server(entries.into_iter().map(|(id, m, r)| record(id, m, r)).collect());

        store.load_notifications();
        let first = store.snapshot();
        store.load_notifications();

        prop_assert_eq!(store.snapshot(), first);
    }
}
