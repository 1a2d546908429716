//! CRUD and scans over the `documents` table.

use chrono::{DateTime, Utc};
use dualstore_core::{DomainRecord, PaginatedResult, Payload, ScanQuery};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::usize_to_i64;
use crate::error::BackendError;

const DOCUMENT_COLUMNS: &str = "collection, id, document, version, updated_at";

fn row_to_record(row: &PgRow) -> Result<DomainRecord, BackendError> {
    let document: Value = row.try_get("document")?;
    let Value::Object(payload) = document else {
        return Err(BackendError::Unknown(format!(
            "stored document is not an object: {document}"
        )));
    };
    Ok(DomainRecord {
        collection: row.try_get("collection")?,
        id: row.try_get("id")?,
        payload,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) async fn insert(
    pool: &PgPool,
    collection: &str,
    payload: Payload,
) -> Result<DomainRecord, BackendError> {
    let id = Uuid::new_v4().simple().to_string();
    let updated_at: DateTime<Utc> = sqlx::query_scalar(
        "INSERT INTO documents (collection, id, document, version, updated_at)
         VALUES ($1, $2, $3, 1, NOW())
         RETURNING updated_at",
    )
    .bind(collection)
    .bind(&id)
    .bind(Json(&payload))
    .fetch_one(pool)
    .await?;
    Ok(DomainRecord { collection: collection.to_owned(), id, payload, version: 1, updated_at })
}

pub(super) async fn find(
    pool: &PgPool,
    collection: &str,
    id: &str,
) -> Result<Option<DomainRecord>, BackendError> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = $1 AND id = $2"
    ))
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_record).transpose()
}

/// Compare-and-swap on `version`: no write happens unless it matches.
pub(super) async fn replace(
    pool: &PgPool,
    collection: &str,
    id: &str,
    payload: Payload,
    expected_version: i64,
) -> Result<DomainRecord, BackendError> {
    let updated = sqlx::query(&format!(
        "UPDATE documents SET document = $3, version = version + 1, updated_at = NOW()
         WHERE collection = $1 AND id = $2 AND version = $4
         RETURNING {DOCUMENT_COLUMNS}"
    ))
    .bind(collection)
    .bind(id)
    .bind(Json(&payload))
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = updated {
        return row_to_record(&row);
    }

    let actual: Option<i64> =
        sqlx::query_scalar("SELECT version FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Err(match actual {
        Some(actual) => BackendError::Conflict(format!(
            "{collection}/{id}: expected version {expected_version}, found {actual}"
        )),
        None => BackendError::NotFound(format!("{collection}/{id}")),
    })
}

pub(super) async fn delete(pool: &PgPool, collection: &str, id: &str) -> Result<(), BackendError> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(BackendError::NotFound(format!("{collection}/{id}")));
    }
    Ok(())
}

pub(super) async fn scan(
    pool: &PgPool,
    query: &ScanQuery,
) -> Result<PaginatedResult<DomainRecord>, BackendError> {
    let limit = query.effective_limit();
    let field = query.filter.as_ref().map(|f| f.field.as_str());
    let value = query.filter.as_ref().map(|f| f.value.clone());

    // Containment lets the GIN index prune; the equality keeps arrays and objects exact.
    const WHERE: &str = "collection = $1 AND ($2::text IS NULL OR (
            document @> jsonb_build_object($2::text, $3::jsonb)
            AND document -> $2::text = $3::jsonb))";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM documents WHERE {WHERE}"))
        .bind(&query.collection)
        .bind(field)
        .bind(value.clone())
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {WHERE}
         ORDER BY updated_at DESC, id DESC LIMIT $4 OFFSET $5"
    ))
    .bind(&query.collection)
    .bind(field)
    .bind(value)
    .bind(usize_to_i64(limit))
    .bind(usize_to_i64(query.offset))
    .fetch_all(pool)
    .await?;

    let items = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
    Ok(PaginatedResult::new(
        items,
        u64::try_from(total).unwrap_or(0),
        query.offset as u64,
        limit as u64,
    ))
}

pub(super) async fn export_all(pool: &PgPool) -> Result<Vec<DomainRecord>, BackendError> {
    let rows = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY collection, id"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_record).collect()
}
