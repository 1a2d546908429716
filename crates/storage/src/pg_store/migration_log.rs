use dualstore_core::MigrationRecord;
use sqlx::{PgPool, Row};

use crate::error::BackendError;

pub(super) async fn load(pool: &PgPool) -> Result<Vec<MigrationRecord>, BackendError> {
    let rows = sqlx::query(
        "SELECT attempt, version, name, applied_at, duration_ms, success, error
         FROM schema_migrations ORDER BY attempt",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(MigrationRecord {
                attempt: row.try_get("attempt")?,
                version: u32::try_from(row.try_get::<i32, _>("version")?).unwrap_or(0),
                name: row.try_get("name")?,
                applied_at: row.try_get("applied_at")?,
                duration_ms: u64::try_from(row.try_get::<i64, _>("duration_ms")?).unwrap_or(0),
                success: row.try_get("success")?,
                error: row.try_get("error")?,
            })
        })
        .collect()
}

pub(super) async fn append(pool: &PgPool, record: &MigrationRecord) -> Result<i64, BackendError> {
    let version = i32::try_from(record.version)
        .map_err(|_| BackendError::Unknown(format!("version {} out of range", record.version)))?;
    let attempt: i64 = sqlx::query_scalar(
        "INSERT INTO schema_migrations (version, name, applied_at, duration_ms, success, error)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING attempt",
    )
    .bind(version)
    .bind(&record.name)
    .bind(record.applied_at)
    .bind(i64::try_from(record.duration_ms).unwrap_or(i64::MAX))
    .bind(record.success)
    .bind(&record.error)
    .fetch_one(pool)
    .await?;
    Ok(attempt)
}

pub(super) async fn clearance(pool: &PgPool) -> Result<i64, BackendError> {
    let through: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(cleared_through), 0)::BIGINT FROM schema_migration_clearances",
    )
    .fetch_one(pool)
    .await?;
    Ok(through)
}

pub(super) async fn clear(pool: &PgPool) -> Result<i64, BackendError> {
    let through: i64 = sqlx::query_scalar(
        "INSERT INTO schema_migration_clearances (cleared_through)
         SELECT COALESCE(MAX(attempt), 0) FROM schema_migrations
         RETURNING cleared_through",
    )
    .fetch_one(pool)
    .await?;
    Ok(through)
}
