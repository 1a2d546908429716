//! Typed error enums for the service layer.
//!
//! Storage failures pass through unchanged inside these wrappers so callers
//! can still match on not-found, conflict, timeout and unavailable.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dualstore_core::{BackendName, ConfigError, ConnectionState};
use dualstore_storage::{BackendError, MigrationError};
use thiserror::Error;

/// Lifecycle failures of [`crate::Persistence`].
#[derive(Debug, Error)]
pub enum InitError {
    /// Neither backend could be connected; nothing can serve requests.
    #[error("both backends are down (primary: {primary}; fallback: {fallback})")]
    BothBackendsDown { primary: String, fallback: String },

    #[error("persistence layer is already initialized")]
    AlreadyInitialized,

    #[error("persistence layer is not initialized")]
    NotInitialized,

    #[error("persistence layer has been shut down")]
    ShutDown,

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// The migration source directory could not be loaded.
    #[error("migrations: {0}")]
    Migrations(#[from] MigrationError),
}

/// Repository call failure.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Surfaced verbatim from the active backend.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("persistence layer is shutting down")]
    ShuttingDown,

    /// Caller data that cannot be stored (not an object, empty collection name).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl RepoError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_not_found())
    }

    /// Whether retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_transient())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Backup failure. Never affects failover or repository state.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("export: {0}")]
    Backend(#[from] BackendError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `from + days` falls outside the representable calendar.
    #[error("retention of {days} days from {from} is out of range")]
    RetentionOutOfRange { from: DateTime<Utc>, days: i64 },
}

/// Failure of an operator action on a running persistence layer.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Manual failover target is not connected or degraded.
    #[error("cannot switch to {backend}: backend is {state}")]
    TargetUnusable { backend: BackendName, state: ConnectionState },
}
