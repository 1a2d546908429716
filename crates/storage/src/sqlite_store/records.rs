use chrono::Utc;
use dualstore_core::{DomainRecord, PaginatedResult, Payload, ScanQuery};
use rusqlite::{params, Connection, OptionalExtension};

use super::mapping::{encode_value, flatten, numeric_key, unflatten};
use super::{format_ts, parse_ts, SqliteStore};
use crate::error::BackendError;

const RECORD_COLUMNS: &str = "id, collection, version, updated_at";

/// Native ids are the integer row id rendered as text; anything else cannot exist here.
fn parse_native_id(id: &str) -> Option<i64> {
    id.parse().ok()
}

fn not_found(collection: &str, id: &str) -> BackendError {
    BackendError::NotFound(format!("{collection}/{id}"))
}

struct RecordRow {
    id: i64,
    collection: String,
    version: i64,
    updated_at: String,
}

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        collection: row.get(1)?,
        version: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn load_payload(conn: &Connection, record_id: i64) -> Result<Payload, BackendError> {
    let mut stmt = conn.prepare_cached(
        "SELECT field, value_type, value FROM record_fields WHERE record_id = ?1 ORDER BY field",
    )?;
    let rows = stmt
        .query_map(params![record_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<(String, String, Option<String>)>, _>>()?;
    unflatten(rows)
}

fn hydrate(conn: &Connection, row: RecordRow) -> Result<DomainRecord, BackendError> {
    Ok(DomainRecord {
        payload: load_payload(conn, row.id)?,
        collection: row.collection,
        id: row.id.to_string(),
        version: row.version,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

fn write_fields(conn: &Connection, record_id: i64, payload: &Payload) -> Result<(), BackendError> {
    conn.execute("DELETE FROM record_fields WHERE record_id = ?1", params![record_id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO record_fields (record_id, field, value_type, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for row in flatten(payload)? {
        stmt.execute(params![record_id, row.field, row.value_type, row.value])?;
    }
    Ok(())
}

impl SqliteStore {
    pub(crate) fn insert(&self, collection: &str, payload: &Payload) -> Result<DomainRecord, BackendError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO records (collection, version, updated_at) VALUES (?1, 1, ?2)",
            params![collection, format_ts(now)],
        )?;
        let id = tx.last_insert_rowid();
        write_fields(&tx, id, payload)?;
        tx.commit()?;
        Ok(DomainRecord {
            collection: collection.to_owned(),
            id: id.to_string(),
            payload: payload.clone(),
            version: 1,
            updated_at: parse_ts(&format_ts(now))?,
        })
    }

    pub(crate) fn find(&self, collection: &str, id: &str) -> Result<Option<DomainRecord>, BackendError> {
        let Some(native_id) = parse_native_id(id) else {
            return Ok(None);
        };
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1 AND collection = ?2"),
                params![native_id, collection],
                map_record_row,
            )
            .optional()?;
        row.map(|r| hydrate(&conn, r)).transpose()
    }

    /// Compare-and-swap on `version`: no write happens unless it matches.
    pub(crate) fn replace(
        &self,
        collection: &str,
        id: &str,
        payload: &Payload,
        expected_version: i64,
    ) -> Result<DomainRecord, BackendError> {
        let native_id = parse_native_id(id).ok_or_else(|| not_found(collection, id))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = format_ts(Utc::now());
        let changed = tx.execute(
            "UPDATE records SET version = version + 1, updated_at = ?1
             WHERE id = ?2 AND collection = ?3 AND version = ?4",
            params![now, native_id, collection, expected_version],
        )?;
        if changed == 0 {
            let actual: Option<i64> = tx
                .query_row(
                    "SELECT version FROM records WHERE id = ?1 AND collection = ?2",
                    params![native_id, collection],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => BackendError::Conflict(format!(
                    "{collection}/{id}: expected version {expected_version}, found {actual}"
                )),
                None => not_found(collection, id),
            });
        }
        write_fields(&tx, native_id, payload)?;
        tx.commit()?;
        Ok(DomainRecord {
            collection: collection.to_owned(),
            id: id.to_owned(),
            payload: payload.clone(),
            version: expected_version + 1,
            updated_at: parse_ts(&now)?,
        })
    }

    pub(crate) fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let native_id = parse_native_id(id).ok_or_else(|| not_found(collection, id))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM records WHERE id = ?1 AND collection = ?2",
            params![native_id, collection],
        )?;
        if removed == 0 {
            return Err(not_found(collection, id));
        }
        tx.execute("DELETE FROM record_fields WHERE record_id = ?1", params![native_id])?;
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn scan(&self, query: &ScanQuery) -> Result<PaginatedResult<DomainRecord>, BackendError> {
        let conn = self.conn()?;
        let limit = query.effective_limit();
        let filter = query
            .filter
            .as_ref()
            .map(|f| {
                encode_value(&f.value)
                    .map(|(ty, value)| (f.field.as_str(), ty, value, numeric_key(&f.value)))
            })
            .transpose()?;

        // ?5 is the numeric key: stored numbers also match by value within the exact f64 range.
        const FILTER: &str = "EXISTS (SELECT 1 FROM record_fields f
                 WHERE f.record_id = r.id AND f.field = ?2 AND f.value_type = ?3
                   AND (f.value IS ?4
                        OR (?5 IS NOT NULL
                            AND ABS(CAST(f.value AS REAL)) <= 9007199254740992.0
                            AND CAST(f.value AS REAL) = ?5)))";

        let (total, rows) = match &filter {
            Some((field, value_type, value, key)) => {
                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM records r WHERE r.collection = ?1 AND {FILTER}"),
                    params![query.collection, field, value_type, value, key],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT r.id, r.collection, r.version, r.updated_at FROM records r
                     WHERE r.collection = ?1 AND {FILTER}
                     ORDER BY r.updated_at DESC, r.id DESC LIMIT ?6 OFFSET ?7"
                ))?;
                let rows = stmt
                    .query_map(
                        params![
                            query.collection,
                            field,
                            value_type,
                            value,
                            key,
                            limit as i64,
                            query.offset as i64
                        ],
                        map_record_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            },
            None => {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM records WHERE collection = ?1",
                    params![query.collection],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?1
                     ORDER BY updated_at DESC, id DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt
                    .query_map(
                        params![query.collection, limit as i64, query.offset as i64],
                        map_record_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            },
        };

        let items = rows.into_iter().map(|r| hydrate(&conn, r)).collect::<Result<Vec<_>, _>>()?;
        Ok(PaginatedResult::new(items, total as u64, query.offset as u64, limit as u64))
    }

    pub(crate) fn export_all(&self) -> Result<Vec<DomainRecord>, BackendError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY collection, id"))?;
        let rows = stmt.query_map([], map_record_row)?.collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| hydrate(&conn, r)).collect()
    }
}
