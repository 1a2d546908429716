//! Typed error enums for the storage layer.
//!
//! Callers match on specific failure modes (not found, conflict, timeout,
//! unavailable) instead of downcasting opaque boxes.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a backend-native operation. Surfaced verbatim to repository callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Record not found for expected-present entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Version mismatch or unique constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation did not finish within its configured bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Backend not connected, pool exhausted or connection lost.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Anything else, including corrupt stored data.
    #[error("backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    /// Whether this error says something about backend health rather than about the data.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Custom `From<sqlx::Error>`, not a blanket `#[from]`.
///
/// - `RowNotFound` → `NotFound`
/// - SQLSTATE 23505 → `Conflict`
/// - pool / IO / TLS failures → `Unavailable`
/// - everything else → `Unknown`
impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_owned()),
            sqlx::Error::Database(db_err) if db_err.code().is_some_and(|c| c == "23505") => {
                Self::Conflict(db_err.message().to_owned())
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            _ => Self::Unknown(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("row".to_owned()),
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::ConstraintViolation => Self::Conflict(err.to_string()),
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure => Self::Unavailable(err.to_string()),
                _ => Self::Unknown(err.to_string()),
            },
            _ => Self::Unknown(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for BackendError {
    fn from(err: r2d2::Error) -> Self {
        Self::Unavailable(format!("failed to get connection from pool: {err}"))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(format!("corrupt stored payload: {err}"))
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unknown(format!("spawn_blocking join error: {err}"))
    }
}

/// Failure to establish a backend connection. Retried only by the next health probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),

    /// Another connect attempt is already running for this handle.
    #[error("connect already in progress")]
    InProgress,
}

/// Failure of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PingError {
    #[error("ping timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend not connected")]
    NotConnected,

    #[error("ping failed: {0}")]
    Failed(String),
}

/// Migration failure. Halts further migrations for that backend; never fatal for the process.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Versions are not strictly increasing and contiguous from 1, or files are malformed.
    #[error("invalid migration set: {0}")]
    InvalidSet(String),

    /// An earlier failed attempt has not been cleared by an operator.
    #[error("migrations blocked by failed v{version}: {error}")]
    Blocked { version: u32, error: String },

    /// `applied` counts the versions this run committed before the failing one.
    #[error("migration v{version} ({name}) failed after {applied} applied: {error}")]
    Failed { version: u32, name: String, applied: usize, error: String },

    /// Reading or writing the migration log failed.
    #[error("migration log: {0}")]
    Backend(#[from] BackendError),

    #[error("cannot read migrations from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
