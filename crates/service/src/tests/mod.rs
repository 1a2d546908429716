//! Test utilities and module declarations for service tests.

#![expect(clippy::unwrap_used, reason = "test code")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dualstore_core::{
    BackendKind, BackupSchedule, DomainRecord, MigrationRecord, Payload, PersistenceConfig,
};
use dualstore_storage::{
    BackendDriver, BackendError, ConnectError, Operation, PingError, RawResult, SqliteStore,
};
use serde_json::Value;
use tempfile::TempDir;

use crate::Persistence;

/// SQLite-backed driver that can be switched off to simulate an outage,
/// or made to hang on data operations.
#[derive(Debug)]
pub struct FlakyDriver {
    inner: SqliteStore,
    down: AtomicBool,
    stalled: AtomicBool,
}

impl FlakyDriver {
    pub fn new(inner: SqliteStore) -> Self {
        Self { inner, down: AtomicBool::new(false), stalled: AtomicBool::new(false) }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn outage() -> BackendError {
        BackendError::Unavailable("simulated outage".to_owned())
    }
}

#[async_trait]
impl BackendDriver for FlakyDriver {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn describe(&self) -> String {
        format!("flaky+{}", self.inner.describe())
    }

    async fn connect(&self, timeout: Duration) -> Result<(), ConnectError> {
        if self.is_down() {
            return Err(ConnectError::Refused("simulated outage".to_owned()));
        }
        self.inner.connect(timeout).await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    async fn ping(&self) -> Result<(), PingError> {
        if self.is_down() {
            return Err(PingError::Failed("simulated outage".to_owned()));
        }
        self.inner.ping().await
    }

    async fn execute(&self, operation: Operation) -> Result<RawResult, BackendError> {
        if self.is_down() {
            return Err(Self::outage());
        }
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.execute(operation).await
    }

    async fn export_records(&self) -> Result<Vec<DomainRecord>, BackendError> {
        if self.is_down() {
            return Err(Self::outage());
        }
        self.inner.export_records().await
    }

    async fn apply_migration_sql(&self, sql: &str) -> Result<(), BackendError> {
        if self.is_down() {
            return Err(Self::outage());
        }
        self.inner.apply_migration_sql(sql).await
    }

    async fn migration_log(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        if self.is_down() {
            return Err(Self::outage());
        }
        self.inner.migration_log().await
    }

    async fn append_migration_record(&self, record: &MigrationRecord) -> Result<i64, BackendError> {
        if self.is_down() {
            return Err(Self::outage());
        }
        self.inner.append_migration_record(record).await
    }

    async fn migration_clearance(&self) -> Result<i64, BackendError> {
        self.inner.migration_clearance().await
    }

    async fn clear_migration_failures(&self) -> Result<i64, BackendError> {
        self.inner.clear_migration_failures().await
    }
}

/// A persistence layer over two SQLite files; the primary can be taken down.
pub struct TestBed {
    pub persistence: Persistence,
    pub primary: Arc<FlakyDriver>,
    pub fallback: Arc<FlakyDriver>,
    pub dir: TempDir,
}

/// Health ticks are driven by `probe_now`; timers are far in the future.
pub fn test_config(dir: &TempDir) -> PersistenceConfig {
    let mut config = PersistenceConfig::default();
    config.fallback.storage_path = dir.path().join("fallback.db");
    config.health.interval_ms = 3_600_000;
    config.backup.directory = dir.path().join("backups");
    config.backup.cron = BackupSchedule::Every(chrono::Duration::days(1));
    config
}

pub fn test_bed() -> TestBed {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let primary = Arc::new(FlakyDriver::new(SqliteStore::new(dir.path().join("primary.db"))));
    let fallback = Arc::new(FlakyDriver::new(SqliteStore::new(config.fallback.storage_path.clone())));
    let persistence = Persistence::with_drivers(config, primary.clone(), fallback.clone()).unwrap();
    TestBed { persistence, primary, fallback, dir }
}

/// Test bed already initialized with both backends up.
pub async fn running_bed() -> TestBed {
    let bed = test_bed();
    bed.persistence.initialize().await.unwrap();
    bed
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    }
}

mod failover_tests;
mod lifecycle_tests;
