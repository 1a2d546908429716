//! Async [`BackendDriver`] implementation for [`SqliteStore`] via `spawn_blocking`.

use std::time::Duration;

use async_trait::async_trait;
use dualstore_core::{BackendKind, DomainRecord, MigrationRecord};

use crate::driver::{BackendDriver, Operation, RawResult};
use crate::error::{BackendError, ConnectError, PingError};
use crate::sqlite_store::SqliteStore;

/// Helper: run a blocking closure on the tokio blocking pool.
async fn blocking<F, T, E>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<tokio::task::JoinError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Body-generating macro for async-to-blocking delegation.
///
/// Each argument is annotated with a capture kind:
/// - `@ref arg`: `.clone()` a `&T`, pass as `&arg`
/// - `@str arg`: `.to_owned()` a `&str`, pass as `&arg`
/// - `@val arg`: move directly (Copy/owned types)
macro_rules! delegate {
    ($self:ident, $method:ident $(, @$kind:ident $arg:ident)*) => {{
        let s = $self.clone();
        $(delegate!(@capture $kind $arg);)*
        blocking(move || s.$method($(delegate!(@pass $kind $arg)),*)).await
    }};
    (@capture ref $arg:ident) => { let $arg = $arg.clone(); };
    (@capture str $arg:ident) => { let $arg = $arg.to_owned(); };
    (@capture val $arg:ident) => { };
    (@pass ref $arg:ident) => { &$arg };
    (@pass str $arg:ident) => { &$arg };
    (@pass val $arg:ident) => { $arg };
}

impl From<tokio::task::JoinError> for PingError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Failed(format!("spawn_blocking join error: {err}"))
    }
}

impl From<tokio::task::JoinError> for ConnectError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Refused(format!("spawn_blocking join error: {err}"))
    }
}

impl SqliteStore {
    fn run_operation(&self, operation: Operation) -> Result<RawResult, BackendError> {
        match operation {
            Operation::Insert { collection, payload } => {
                self.insert(&collection, &payload).map(RawResult::Record)
            },
            Operation::Find { collection, id } => self.find(&collection, &id).map(RawResult::Found),
            Operation::Replace { collection, id, payload, expected_version } => self
                .replace(&collection, &id, &payload, expected_version)
                .map(RawResult::Record),
            Operation::Delete { collection, id } => {
                self.delete(&collection, &id).map(|()| RawResult::Deleted)
            },
            Operation::Scan(query) => self.scan(&query).map(RawResult::Page),
        }
    }
}

#[async_trait]
impl BackendDriver for SqliteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::EmbeddedStore
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path().display())
    }

    async fn connect(&self, timeout: Duration) -> Result<(), ConnectError> {
        delegate!(self, open, @val timeout)
    }

    async fn disconnect(&self) {
        self.close();
    }

    async fn ping(&self) -> Result<(), PingError> {
        delegate!(self, ping_sync)
    }

    async fn execute(&self, operation: Operation) -> Result<RawResult, BackendError> {
        delegate!(self, run_operation, @val operation)
    }

    async fn export_records(&self) -> Result<Vec<DomainRecord>, BackendError> {
        delegate!(self, export_all)
    }

    async fn apply_migration_sql(&self, sql: &str) -> Result<(), BackendError> {
        delegate!(self, apply_sql, @str sql)
    }

    async fn migration_log(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        delegate!(self, migration_log_sync)
    }

    async fn append_migration_record(&self, record: &MigrationRecord) -> Result<i64, BackendError> {
        delegate!(self, append_migration_record_sync, @ref record)
    }

    async fn migration_clearance(&self) -> Result<i64, BackendError> {
        delegate!(self, migration_clearance_sync)
    }

    async fn clear_migration_failures(&self) -> Result<i64, BackendError> {
        delegate!(self, clear_migration_failures_sync)
    }
}
