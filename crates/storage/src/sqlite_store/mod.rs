//! Embedded `SQLite` store.
//!
//! Records are flattened: one `records` row per record and one
//! `record_fields` row per top-level payload field, with composite values
//! JSON-encoded. All methods here are synchronous; the async driver surface
//! lives in `sqlite_async.rs` and hops onto the blocking pool.

// SQLite uses i64 for counts/limits, Rust uses usize - safe conversions within DB context
#![allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "SQLite i64 <-> Rust usize conversions are safe within DB row counts"
)]

mod mapping;
mod migration_log;
mod records;

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use dualstore_core::SQLITE_POOL_SIZE;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::{BackendError, ConnectError, PingError};

/// Type alias for pooled connection
pub(crate) type PooledConn = PooledConnection<SqliteConnectionManager>;

const LOG_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    attempt INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    success INTEGER NOT NULL,
    error TEXT
);
CREATE TABLE IF NOT EXISTS schema_migration_clearances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cleared_through INTEGER NOT NULL,
    cleared_at TEXT NOT NULL
);
";

/// Embedded store wrapping a `SQLite` connection pool that exists only while connected.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
    pool: Arc<RwLock<Option<Pool<SqliteConnectionManager>>>>,
}

/// Timestamps are stored as fixed-width RFC 3339 so text order equals time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, BackendError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| BackendError::Unknown(format!("corrupt timestamp {raw:?}: {e}")))
}

/// Custom connection initializer for concurrency settings
fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), pool: Arc::new(RwLock::new(None)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the pool (creating the file and parent directories) and bootstrap the migration log.
    pub(crate) fn open(&self, timeout: Duration) -> Result<(), ConnectError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConnectError::Refused(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let manager = SqliteConnectionManager::file(&self.path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(SQLITE_POOL_SIZE)
            .connection_timeout(timeout)
            .build(manager)
            .map_err(|e| ConnectError::Refused(e.to_string()))?;

        let conn = pool.get().map_err(|e| ConnectError::Refused(e.to_string()))?;
        conn.execute_batch(LOG_SCHEMA).map_err(|e| ConnectError::Refused(e.to_string()))?;
        drop(conn);

        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        tracing::info!(path = %self.path.display(), pool_size = SQLITE_POOL_SIZE, "SQLite store opened");
        Ok(())
    }

    pub(crate) fn close(&self) {
        // Dropping the pool closes idle connections; checked-out ones close on return.
        self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Get a connection from the pool
    pub(crate) fn conn(&self) -> Result<PooledConn, BackendError> {
        let pool = self
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackendError::Unavailable("SQLite store is not open".to_owned()))?;
        Ok(pool.get()?)
    }

    pub(crate) fn ping_sync(&self) -> Result<(), PingError> {
        let conn = self.conn().map_err(|e| match e {
            BackendError::Unavailable(_) if !self.is_open() => PingError::NotConnected,
            other => PingError::Failed(other.to_string()),
        })?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| PingError::Failed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.pool.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Run a migration script in one transaction.
    pub(crate) fn apply_sql(&self, sql: &str) -> Result<(), BackendError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.commit()?;
        Ok(())
    }
}
