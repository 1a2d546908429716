//! Test utilities and module declarations for storage tests.

#![expect(clippy::unwrap_used, reason = "test code")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dualstore_core::{BackendKind, BackendName, DomainRecord, MigrationRecord, Payload};
use serde_json::Value;
use tempfile::TempDir;

use crate::{
    BackendDriver, BackendError, BackendHandle, ConnectError, HandleTimeouts, MigrationRunner,
    MigrationSet, Operation, PingError, RawResult, SqliteStore,
};

/// Handle over a fresh SQLite file, not yet connected.
pub fn create_test_handle() -> (Arc<BackendHandle>, SqliteStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::new(temp_dir.path().join("fallback.db"));
    let handle =
        BackendHandle::new(BackendName::Fallback, Arc::new(store.clone()), HandleTimeouts::default());
    (Arc::new(handle), store, temp_dir)
}

/// Connected handle with the built-in schema applied.
pub async fn create_ready_handle() -> (Arc<BackendHandle>, TempDir) {
    let (handle, _store, temp_dir) = create_test_handle();
    handle.connect().await.unwrap();
    MigrationRunner::new(MigrationSet::builtin()).migrate(&handle).await.unwrap();
    (handle, temp_dir)
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    }
}

/// SQLite driver whose connect, ping and execute can be made to never return.
#[derive(Debug)]
pub struct StallingDriver {
    inner: SqliteStore,
    stall_connect: AtomicBool,
    stall_ping: AtomicBool,
    stall_execute: AtomicBool,
}

impl StallingDriver {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            stall_connect: AtomicBool::new(false),
            stall_ping: AtomicBool::new(false),
            stall_execute: AtomicBool::new(false),
        }
    }

    pub fn stall_connect(&self, on: bool) {
        self.stall_connect.store(on, Ordering::SeqCst);
    }

    pub fn stall_ping(&self, on: bool) {
        self.stall_ping.store(on, Ordering::SeqCst);
    }

    pub fn stall_execute(&self, on: bool) {
        self.stall_execute.store(on, Ordering::SeqCst);
    }
}

async fn stall_if(flag: &AtomicBool) {
    if flag.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl BackendDriver for StallingDriver {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn describe(&self) -> String {
        format!("stalling+{}", self.inner.describe())
    }

    async fn connect(&self, timeout: Duration) -> Result<(), ConnectError> {
        stall_if(&self.stall_connect).await;
        self.inner.connect(timeout).await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    async fn ping(&self) -> Result<(), PingError> {
        stall_if(&self.stall_ping).await;
        self.inner.ping().await
    }

    async fn execute(&self, operation: Operation) -> Result<RawResult, BackendError> {
        stall_if(&self.stall_execute).await;
        self.inner.execute(operation).await
    }

    async fn export_records(&self) -> Result<Vec<DomainRecord>, BackendError> {
        self.inner.export_records().await
    }

    async fn apply_migration_sql(&self, sql: &str) -> Result<(), BackendError> {
        self.inner.apply_migration_sql(sql).await
    }

    async fn migration_log(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        self.inner.migration_log().await
    }

    async fn append_migration_record(&self, record: &MigrationRecord) -> Result<i64, BackendError> {
        self.inner.append_migration_record(record).await
    }

    async fn migration_clearance(&self) -> Result<i64, BackendError> {
        self.inner.migration_clearance().await
    }

    async fn clear_migration_failures(&self) -> Result<i64, BackendError> {
        self.inner.clear_migration_failures().await
    }
}

/// Handle over a [`StallingDriver`] with short bounds on every call.
pub fn create_stalling_handle() -> (Arc<BackendHandle>, Arc<StallingDriver>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let driver = Arc::new(StallingDriver::new(SqliteStore::new(temp_dir.path().join("fallback.db"))));
    let timeouts = HandleTimeouts {
        connect: Duration::from_millis(500),
        ping: Duration::from_millis(50),
        operation: Duration::from_millis(50),
        bulk: Duration::from_secs(5),
    };
    let handle = BackendHandle::new(BackendName::Fallback, driver.clone(), timeouts);
    (Arc::new(handle), driver, temp_dir)
}

mod handle_tests;
