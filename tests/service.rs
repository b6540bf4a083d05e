//! Whole-session wiring: poll and push feeding one store.

mod common;

use common::{contract, wait_until, FakeBackend, FakeTransport, RecordingNavigator, ServerFrame};
use crossbeam_channel::bounded;
use notification_sync::{
    ConnectionState, NotificationService, Receipt, SyncConfig, SyncError, Transport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 60_000,
        poll_on_start: false,
        receive_slice_ms: 5,
        ..Default::default()
    }
}

fn with_push(transport: &Arc<FakeTransport>) -> Option<Arc<dyn Transport>> {
    Some(transport.clone() as Arc<dyn Transport>)
}

#[test]
fn test_poll_only_session_loads_on_start() {
    let backend = FakeBackend::new();
    backend.set_server(vec![contract("n1", 1), contract("n2", 2)]);

    let service = NotificationService::start(
        SyncConfig {
            poll_on_start: true,
            ..config()
        },
        backend.clone(),
        None,
        RecordingNavigator::new(),
    )
    .unwrap();

    let store = service.store();
    assert!(wait_until(WAIT, || store.len() == 2));
    assert!(service.connection().is_none());
}

#[test]
fn test_pushed_frames_reach_store() {
    let backend = FakeBackend::new();
    let transport = FakeTransport::new();
    let server = transport.accept();

    let service =
        NotificationService::start(config(), backend, with_push(&transport), RecordingNavigator::new())
            .unwrap();
    let connection = service.connection().unwrap();
    assert!(wait_until(WAIT, || connection.state() == ConnectionState::Connected));

    let frame = json!({
        "event": "notification",
        "notification": {
            "_id": "n7",
            "type": "contract_generated",
            "data": { "contractId": "C9", "companyName": "Delta Tyres" },
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00Z"
        }
    });
    server.send(ServerFrame::Text(frame.to_string())).unwrap();
    server.send(ServerFrame::Text(r#"{"type":"heartbeat"}"#.to_string())).unwrap();

    let store = service.store();
    assert!(wait_until(WAIT, || connection.message_count() == 2));
    assert_eq!(store.len(), 1);

    let record = store.get(&"n7".into()).unwrap();
    assert_eq!(store.resolve(&record).action_url, "/contracts/C9");
}

#[test]
fn test_poll_now_fetches_immediately() {
    let backend = FakeBackend::new();
    let service =
        NotificationService::start(config(), backend.clone(), None, RecordingNavigator::new())
            .unwrap();

    backend.set_server(vec![contract("n1", 1)]);
    service.poll_now();

    let store = service.store();
    assert!(wait_until(WAIT, || store.len() == 1));
    assert_eq!(backend.fetch_count(), 1);
}

#[test]
fn test_connect_on_start_can_be_disabled() {
    let transport = FakeTransport::new();
    let _server = transport.accept();

    let service = NotificationService::start(
        SyncConfig {
            connect_on_start: false,
            ..config()
        },
        FakeBackend::new(),
        with_push(&transport),
        RecordingNavigator::new(),
    )
    .unwrap();

    let connection = service.connection().unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    connection.connect();
    assert!(wait_until(WAIT, || connection.state() == ConnectionState::Connected));
}

#[test]
fn test_shutdown_tears_everything_down() {
    let backend = FakeBackend::new();
    let transport = FakeTransport::new();
    let _server = transport.accept();

    let service = NotificationService::start(
        config(),
        backend.clone(),
        with_push(&transport),
        RecordingNavigator::new(),
    )
    .unwrap();
    let connection = service.connection().unwrap();
    let store = service.store();
    assert!(wait_until(WAIT, || connection.state() == ConnectionState::Connected));

    store.ingest(contract("n1", 1));
    store.mark_as_read(&"n1".into());
    service.shutdown();
    service.shutdown();

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(transport.closes(), 1);
    // Pending receipts were drained before shutdown returned.
    assert_eq!(backend.receipts(), vec![Receipt::Read("n1".into())]);

    service.poll_now();
    assert_eq!(backend.fetch_count(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = NotificationService::start(
        SyncConfig {
            poll_interval_ms: 0,
            ..config()
        },
        FakeBackend::new(),
        None,
        RecordingNavigator::new(),
    );
    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}

#[test]
fn test_shutdown_from_poll_subscriber() {
    let backend = FakeBackend::new();
    backend.set_server(vec![contract("n1", 1)]);
    let service = Arc::new(
        NotificationService::start(config(), backend.clone(), None, RecordingNavigator::new())
            .unwrap(),
    );
    let store = service.store();

    let (done_tx, done_rx) = bounded(1);
    let weak = Arc::downgrade(&service);
    let _handle = store.subscribe(move |snapshot| {
        if snapshot.is_empty() {
            return;
        }
        // Runs on the poller thread, inside the poll's commit.
        if let Some(service) = weak.upgrade() {
            service.shutdown();
            let _ = done_tx.try_send(());
        }
    });

    service.poll_now();
    done_rx.recv_timeout(WAIT).unwrap();

    assert_eq!(store.len(), 1);
    service.poll_now();
    assert_eq!(backend.fetch_count(), 1);
}
