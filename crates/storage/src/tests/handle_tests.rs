use std::sync::Arc;
use std::time::{Duration, Instant};

use dualstore_core::{BackendName, ConnectionState, ScanQuery};

use super::{create_ready_handle, create_stalling_handle, create_test_handle};
use crate::{BackendError, BackendHandle, ConnectError, HandleTimeouts, Operation, PingError, SqliteStore};

#[tokio::test]
async fn connect_moves_through_connecting_and_publishes() {
    let (handle, _store, _dir) = create_test_handle();
    let mut transitions = handle.subscribe();
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    handle.connect().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);

    let first = transitions.recv().await.unwrap();
    assert_eq!((first.from, first.to), (ConnectionState::Disconnected, ConnectionState::Connecting));
    let second = transitions.recv().await.unwrap();
    assert_eq!((second.from, second.to), (ConnectionState::Connecting, ConnectionState::Connected));
    assert_eq!(second.backend, BackendName::Fallback);

    // Already connected: no-op.
    handle.connect().await.unwrap();
    assert!(transitions.try_recv().is_err());
}

#[tokio::test]
async fn refused_connect_leaves_handle_disconnected_with_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let store = SqliteStore::new(blocker.join("nested").join("fallback.db"));
    let handle =
        BackendHandle::new(BackendName::Fallback, Arc::new(store), HandleTimeouts::default());

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(err, ConnectError::Refused(_)), "got {err:?}");
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.last_error().is_some());
}

#[tokio::test]
async fn disconnected_handle_fails_fast() {
    let (handle, _store, _dir) = create_test_handle();

    let err = handle.execute(Operation::Scan(ScanQuery::new("users"))).await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable(_)));
    assert_eq!(handle.ping().await.unwrap_err(), PingError::NotConnected);
}

#[tokio::test]
async fn mark_disconnected_then_reconnect() {
    let (handle, _dir) = create_ready_handle().await;
    assert!(handle.ping().await.is_ok());

    handle.mark_disconnected("probe failures").await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(handle.last_error().as_deref(), Some("probe failures"));
    assert!(!handle.is_usable());

    handle.connect().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
    let page = handle
        .execute(Operation::Scan(ScanQuery::new("users")))
        .await
        .unwrap()
        .into_page()
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn stalled_connect_times_out_and_stays_disconnected() {
    let (handle, driver, _dir) = create_stalling_handle();
    driver.stall_connect(true);

    let started = Instant::now();
    let err = handle.connect().await.unwrap_err();
    assert_eq!(err, ConnectError::Timeout(Duration::from_millis(500)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.last_error().unwrap().contains("timed out"));

    driver.stall_connect(false);
    handle.connect().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn stalled_ping_times_out_on_its_own_bound_and_degrades() {
    let (handle, driver, _dir) = create_stalling_handle();
    handle.connect().await.unwrap();
    driver.stall_ping(true);

    let err = handle.ping().await.unwrap_err();
    assert_eq!(err, PingError::Timeout(Duration::from_millis(50)));
    assert_eq!(handle.state(), ConnectionState::Degraded);

    // Operations are still admitted while degraded.
    assert!(handle.is_usable());

    driver.stall_ping(false);
    handle.ping().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn stalled_operation_times_out_and_degrades() {
    let (handle, driver, _dir) = create_stalling_handle();
    handle.connect().await.unwrap();
    let mut transitions = handle.subscribe();
    driver.stall_execute(true);

    let started = Instant::now();
    let err = handle.execute(Operation::Scan(ScanQuery::new("users"))).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout(limit) if limit == Duration::from_millis(50)));
    assert!(err.is_transient());
    assert!(started.elapsed() < Duration::from_secs(2));

    let degraded = transitions.recv().await.unwrap();
    assert_eq!((degraded.from, degraded.to), (ConnectionState::Connected, ConnectionState::Degraded));
    assert!(degraded.error.unwrap().contains("timed out"));
    assert_eq!(handle.state(), ConnectionState::Degraded);
}
