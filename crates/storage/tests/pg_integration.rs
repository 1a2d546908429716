//! Integration tests for the PostgreSQL document store.
//! Run with: DATABASE_URL=... cargo test -p dualstore-storage -- --ignored pg_

#![allow(clippy::unwrap_used, reason = "integration test code")]

use std::sync::Arc;

use dualstore_core::{BackendName, FieldFilter, Payload, ScanQuery};
use dualstore_storage::{
    BackendHandle, HandleTimeouts, MigrationRunner, MigrationSet, Operation, PgDocumentStore,
};
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_pg_handle() -> BackendHandle {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for PostgreSQL integration tests");
    let handle = BackendHandle::new(
        BackendName::Primary,
        Arc::new(PgDocumentStore::new(Some(url))),
        HandleTimeouts::default(),
    );
    handle.connect().await.expect("Failed to connect to PostgreSQL");
    MigrationRunner::new(MigrationSet::builtin()).migrate(&handle).await.unwrap();
    handle
}

fn unique_collection() -> String {
    format!("test-{}", Uuid::new_v4())
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    }
}

#[tokio::test]
#[ignore]
async fn pg_migrations_replay_is_noop() {
    let handle = create_pg_handle().await;
    let runner = MigrationRunner::new(MigrationSet::builtin());
    assert_eq!(runner.migrate(&handle).await.unwrap(), 0);
    assert_eq!(runner.applied_version(&handle).await.unwrap(), 3);
}

#[tokio::test]
#[ignore]
async fn pg_insert_find_replace_delete() {
    let handle = create_pg_handle().await;
    let collection = unique_collection();
    let body = json!({"name": "ada", "prefs": {"theme": "dark"}, "tags": ["math"]});

    let created = handle
        .execute(Operation::Insert { collection: collection.clone(), payload: payload(body.clone()) })
        .await
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.id.len(), 32);

    let found = handle
        .execute(Operation::Find { collection: collection.clone(), id: created.id.clone() })
        .await
        .unwrap()
        .into_found()
        .unwrap()
        .unwrap();
    assert_eq!(found.payload, payload(body));

    let replaced = handle
        .execute(Operation::Replace {
            collection: collection.clone(),
            id: created.id.clone(),
            payload: payload(json!({"name": "grace"})),
            expected_version: 1,
        })
        .await
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(replaced.version, 2);

    let stale = handle
        .execute(Operation::Replace {
            collection: collection.clone(),
            id: created.id.clone(),
            payload: payload(json!({"name": "mallory"})),
            expected_version: 1,
        })
        .await
        .unwrap_err();
    assert!(stale.is_conflict());

    handle
        .execute(Operation::Delete { collection: collection.clone(), id: created.id.clone() })
        .await
        .unwrap();
    let gone = handle
        .execute(Operation::Delete { collection, id: created.id })
        .await
        .unwrap_err();
    assert!(gone.is_not_found());
}

#[tokio::test]
#[ignore]
async fn pg_scan_matches_exact_json_values() {
    let handle = create_pg_handle().await;
    let collection = unique_collection();
    for body in [
        json!({"tier": "gold", "tags": ["a"]}),
        json!({"tier": "gold", "tags": ["a", "b"]}),
        json!({"tier": "silver"}),
    ] {
        handle
            .execute(Operation::Insert { collection: collection.clone(), payload: payload(body) })
            .await
            .unwrap();
    }

    let gold = handle
        .execute(Operation::Scan(
            ScanQuery::new(collection.clone()).with_filter(FieldFilter::new("tier", "gold")),
        ))
        .await
        .unwrap()
        .into_page()
        .unwrap();
    assert_eq!(gold.total, 2);

    // Containment alone would also match ["a", "b"].
    let exact = handle
        .execute(Operation::Scan(
            ScanQuery::new(collection).with_filter(FieldFilter::new("tags", json!(["a"]))),
        ))
        .await
        .unwrap()
        .into_page()
        .unwrap();
    assert_eq!(exact.total, 1);
}

#[tokio::test]
#[ignore]
async fn pg_ping_reports_latency() {
    let handle = create_pg_handle().await;
    assert!(handle.ping().await.is_ok());
    handle.disconnect().await;
    assert!(handle.ping().await.is_err());
}
