use dualstore_core::{BackendName, ConnectionState};
use dualstore_storage::{MigrationError, MigrationSet};
use serde_json::json;

use super::*;
use crate::{InitError, OperatorError, OverallStatus, RepoError};

#[tokio::test]
async fn both_backends_up_start_on_primary() {
    let bed = test_bed();
    let report = bed.persistence.initialize().await.unwrap();

    assert_eq!(report.active_backend, BackendName::Primary);
    assert!(report.primary.connected && report.fallback.connected);
    let builtin = MigrationSet::builtin().len();
    assert_eq!(report.primary.migrations_applied, builtin);
    assert_eq!(report.fallback.migrations_applied, builtin);

    let status = bed.persistence.status();
    assert_eq!(status.overall, OverallStatus::Healthy);
    assert!(status.backends.iter().all(|b| b.state == ConnectionState::Connected));
    assert!(status.backends.iter().all(|b| b.health.as_ref().is_some_and(|h| h.reachable)));
}

#[tokio::test]
async fn refused_primary_starts_on_fallback() {
    let bed = test_bed();
    bed.primary.set_down(true);
    let report = bed.persistence.initialize().await.unwrap();

    assert_eq!(report.active_backend, BackendName::Fallback);
    assert!(!report.primary.connected);
    assert!(report.primary.error.as_deref().unwrap().contains("simulated outage"));
    assert!(report.fallback.connected);
    assert_eq!(bed.persistence.status().overall, OverallStatus::Degraded);

    let repo = bed.persistence.repository().unwrap();
    repo.create("events", payload(json!({"kind": "boot"}))).await.unwrap();
}

#[tokio::test]
async fn both_backends_down_is_fatal_and_retryable() {
    let bed = test_bed();
    bed.primary.set_down(true);
    bed.fallback.set_down(true);

    let err = bed.persistence.initialize().await.unwrap_err();
    assert!(matches!(err, InitError::BothBackendsDown { .. }), "got {err:?}");
    assert!(matches!(bed.persistence.repository(), Err(InitError::NotInitialized)));
    assert!(bed.persistence.status().failover.is_none());

    bed.fallback.set_down(false);
    let report = bed.persistence.initialize().await.unwrap();
    assert_eq!(report.active_backend, BackendName::Fallback);
}

#[tokio::test]
async fn second_initialize_is_rejected_without_replaying_migrations() {
    let bed = running_bed().await;
    let primary = bed.persistence.handle(BackendName::Primary);
    let before = primary.migration_log().await.unwrap().len();

    let err = bed.persistence.initialize().await.unwrap_err();
    assert!(matches!(err, InitError::AlreadyInitialized));
    assert_eq!(primary.migration_log().await.unwrap().len(), before);
    assert_eq!(bed.persistence.migrate(BackendName::Primary).await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_rejects_new_calls_and_disconnects() {
    let bed = running_bed().await;
    let repo = bed.persistence.repository().unwrap();
    repo.create("events", payload(json!({"kind": "before"}))).await.unwrap();

    bed.persistence.shutdown().await;

    let err = repo.create("events", payload(json!({"kind": "after"}))).await.unwrap_err();
    assert!(matches!(err, RepoError::ShuttingDown));
    assert!(matches!(bed.persistence.repository(), Err(InitError::ShutDown)));
    assert!(matches!(bed.persistence.initialize().await, Err(InitError::ShutDown)));
    for name in BackendName::ALL {
        assert_eq!(bed.persistence.handle(name).state(), ConnectionState::Disconnected);
    }
    assert_eq!(bed.persistence.status().overall, OverallStatus::Down);

    // Idempotent.
    bed.persistence.shutdown().await;
}

#[tokio::test]
async fn failed_migration_blocks_until_cleared() {
    let dir = TempDir::new().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(migrations.join("0004_broken.sqlite.sql"), "CREATE TABLE broken (;").unwrap();

    let mut config = test_config(&dir);
    config.migrations.source_directory = Some(migrations);
    let primary = Arc::new(FlakyDriver::new(SqliteStore::new(dir.path().join("primary.db"))));
    let fallback = Arc::new(FlakyDriver::new(SqliteStore::new(config.fallback.storage_path.clone())));
    let persistence = Persistence::with_drivers(config, primary, fallback).unwrap();

    let report = persistence.initialize().await.unwrap();
    assert!(report.primary.migration_error.is_some());
    assert!(report.fallback.migration_error.is_some());
    // The run stopped at v4; the built-ins before it stay applied.
    assert_eq!(report.fallback.migrations_applied, 3);
    assert_eq!(report.primary.migrations_applied, 3);
    let log = persistence.handle(BackendName::Fallback).migration_log().await.unwrap();
    assert_eq!(log.iter().filter(|r| r.success).count(), 3);
    assert!(log.iter().any(|r| !r.success && r.version == 4));

    let err = persistence.migrate(BackendName::Fallback).await.unwrap_err();
    assert!(
        matches!(err, OperatorError::Migration(MigrationError::Blocked { version: 4, .. })),
        "got {err:?}"
    );

    let watermark = persistence.clear_migration_failure(BackendName::Fallback).await.unwrap();
    assert!(watermark > 0);
    let err = persistence.migrate(BackendName::Fallback).await.unwrap_err();
    assert!(
        matches!(err, OperatorError::Migration(MigrationError::Failed { version: 4, applied: 0, .. })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn operator_calls_require_initialization() {
    let bed = test_bed();
    assert!(matches!(bed.persistence.probe_now().await, Err(InitError::NotInitialized)));
    assert!(matches!(
        bed.persistence.backup_now().await,
        Err(OperatorError::Init(InitError::NotInitialized))
    ));
    assert!(matches!(
        bed.persistence.migrate(BackendName::Fallback).await,
        Err(OperatorError::TargetUnusable { backend: BackendName::Fallback, .. })
    ));
}
