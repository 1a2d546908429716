//! Backend capability trait.
//!
//! Every storage engine implements [`BackendDriver`]; everything above the
//! handle depends only on this trait, never on a concrete engine. Drivers do
//! not bound their own I/O: [`crate::BackendHandle`] wraps every call in a
//! timeout and owns the connection state machine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dualstore_core::{BackendKind, DomainRecord, MigrationRecord, PaginatedResult, Payload, ScanQuery};

use crate::error::{BackendError, ConnectError, PingError};

/// A backend-native data operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Store a new record; the backend assigns the id and sets version 1.
    Insert { collection: String, payload: Payload },
    Find { collection: String, id: String },
    /// Overwrite the payload if the stored version equals `expected_version`,
    /// bumping the version by one.
    Replace { collection: String, id: String, payload: Payload, expected_version: i64 },
    Delete { collection: String, id: String },
    Scan(ScanQuery),
}

impl Operation {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Find { .. } => "find",
            Self::Replace { .. } => "replace",
            Self::Delete { .. } => "delete",
            Self::Scan(_) => "scan",
        }
    }
}

/// Normalized result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Record(DomainRecord),
    Found(Option<DomainRecord>),
    Page(PaginatedResult<DomainRecord>),
    Deleted,
}

impl RawResult {
    fn mismatch(&self, wanted: &str) -> BackendError {
        BackendError::Unknown(format!("driver returned {self:?} where {wanted} was expected"))
    }

    pub fn into_record(self) -> Result<DomainRecord, BackendError> {
        match self {
            Self::Record(record) => Ok(record),
            other => Err(other.mismatch("a record")),
        }
    }

    pub fn into_found(self) -> Result<Option<DomainRecord>, BackendError> {
        match self {
            Self::Found(found) => Ok(found),
            other => Err(other.mismatch("an optional record")),
        }
    }

    pub fn into_page(self) -> Result<PaginatedResult<DomainRecord>, BackendError> {
        match self {
            Self::Page(page) => Ok(page),
            other => Err(other.mismatch("a page")),
        }
    }

    pub fn into_deleted(self) -> Result<(), BackendError> {
        match self {
            Self::Deleted => Ok(()),
            other => Err(other.mismatch("a deletion")),
        }
    }
}

/// One concrete storage engine.
///
/// Implementations own the native connection (pool) and the translation
/// between [`Payload`] and their native schema.
#[async_trait]
pub trait BackendDriver: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Connection target for logs, without credentials.
    fn describe(&self) -> String;

    /// Open the native connection and make sure the migration log tables exist.
    /// `timeout` is passed on so pools can bound their own acquisition.
    async fn connect(&self, timeout: Duration) -> Result<(), ConnectError>;

    /// Close the native connection. Idempotent.
    async fn disconnect(&self);

    /// Cheapest liveness query the engine offers.
    async fn ping(&self) -> Result<(), PingError>;

    async fn execute(&self, operation: Operation) -> Result<RawResult, BackendError>;

    /// Every record in every collection, for backups.
    async fn export_records(&self) -> Result<Vec<DomainRecord>, BackendError>;

    /// Run one migration's statements.
    async fn apply_migration_sql(&self, sql: &str) -> Result<(), BackendError>;

    /// All migration attempts, oldest first.
    async fn migration_log(&self) -> Result<Vec<MigrationRecord>, BackendError>;

    /// Append an attempt; returns its assigned `attempt` number.
    async fn append_migration_record(&self, record: &MigrationRecord) -> Result<i64, BackendError>;

    /// Highest attempt number covered by an operator clearance (0 if none).
    async fn migration_clearance(&self) -> Result<i64, BackendError>;

    /// Append a clearance covering every attempt logged so far; returns its watermark.
    async fn clear_migration_failures(&self) -> Result<i64, BackendError>;
}
