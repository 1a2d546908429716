use chrono::Utc;
use dualstore_core::MigrationRecord;
use rusqlite::params;

use super::{format_ts, parse_ts, SqliteStore};
use crate::error::BackendError;

impl SqliteStore {
    pub(crate) fn migration_log_sync(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT attempt, version, name, applied_at, duration_ms, success, error
             FROM schema_migrations ORDER BY attempt",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(attempt, version, name, applied_at, duration_ms, success, error)| {
                Ok(MigrationRecord {
                    attempt,
                    version: version as u32,
                    name,
                    applied_at: parse_ts(&applied_at)?,
                    duration_ms: duration_ms as u64,
                    success,
                    error,
                })
            })
            .collect()
    }

    pub(crate) fn append_migration_record_sync(
        &self,
        record: &MigrationRecord,
    ) -> Result<i64, BackendError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at, duration_ms, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                i64::from(record.version),
                record.name,
                format_ts(record.applied_at),
                record.duration_ms as i64,
                record.success,
                record.error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub(crate) fn migration_clearance_sync(&self) -> Result<i64, BackendError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(cleared_through), 0) FROM schema_migration_clearances",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn clear_migration_failures_sync(&self) -> Result<i64, BackendError> {
        let conn = self.conn()?;
        let through: i64 = conn.query_row(
            "SELECT COALESCE(MAX(attempt), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO schema_migration_clearances (cleared_through, cleared_at) VALUES (?1, ?2)",
            params![through, format_ts(Utc::now())],
        )?;
        Ok(through)
    }
}
