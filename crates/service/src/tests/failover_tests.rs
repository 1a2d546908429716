use dualstore_core::{BackendName, ConnectionState, FailoverReason};
use serde_json::json;

use super::*;
use crate::OperatorError;

async fn ticks(bed: &TestBed, n: usize) {
    for _ in 0..n {
        bed.persistence.probe_now().await.unwrap();
    }
}

fn active(bed: &TestBed) -> BackendName {
    bed.persistence.status().failover.unwrap().active_backend
}

#[tokio::test]
async fn fails_over_after_three_failed_probes_not_two() {
    let bed = running_bed().await;
    let mut changes = bed.persistence.subscribe_failover().unwrap();
    assert_eq!(active(&bed), BackendName::Primary);

    bed.primary.set_down(true);
    ticks(&bed, 2).await;
    assert_eq!(active(&bed), BackendName::Primary);
    assert_eq!(
        bed.persistence.handle(BackendName::Primary).state(),
        ConnectionState::Degraded
    );

    ticks(&bed, 1).await;
    let state = bed.persistence.status().failover.unwrap();
    assert_eq!(state.active_backend, BackendName::Fallback);
    assert_eq!(state.reason, FailoverReason::HealthTriggered);
    assert_eq!(
        bed.persistence.handle(BackendName::Primary).state(),
        ConnectionState::Disconnected
    );

    let published = changes.recv().await.unwrap();
    assert_eq!(published.active_backend, BackendName::Fallback);
}

#[tokio::test]
async fn fails_back_after_two_successes_reset_by_a_failure() {
    let bed = running_bed().await;
    bed.primary.set_down(true);
    ticks(&bed, 3).await;
    assert_eq!(active(&bed), BackendName::Fallback);

    bed.primary.set_down(false);
    ticks(&bed, 1).await;
    assert_eq!(active(&bed), BackendName::Fallback);

    bed.primary.set_down(true);
    ticks(&bed, 1).await;
    bed.primary.set_down(false);
    ticks(&bed, 1).await;
    assert_eq!(active(&bed), BackendName::Fallback);

    ticks(&bed, 1).await;
    assert_eq!(active(&bed), BackendName::Primary);
    assert_eq!(
        bed.persistence.status().failover.unwrap().reason,
        FailoverReason::HealthTriggered
    );
}

#[tokio::test]
async fn manual_override_holds_until_primary_health_changes() {
    let bed = running_bed().await;
    let forced = bed.persistence.force_backend(BackendName::Fallback).await.unwrap();
    assert_eq!(forced.active_backend, BackendName::Fallback);
    assert_eq!(forced.reason, FailoverReason::Manual);

    // A healthy primary would normally fail back after two ticks.
    ticks(&bed, 3).await;
    assert_eq!(active(&bed), BackendName::Fallback);

    // A primary failure lifts the override; recovery then fails back as usual.
    bed.primary.set_down(true);
    ticks(&bed, 1).await;
    bed.primary.set_down(false);
    ticks(&bed, 1).await;
    assert_eq!(active(&bed), BackendName::Fallback);
    ticks(&bed, 1).await;
    assert_eq!(active(&bed), BackendName::Primary);
}

#[tokio::test]
async fn manual_switch_to_unusable_backend_is_refused() {
    let bed = running_bed().await;
    bed.primary.set_down(true);
    ticks(&bed, 3).await;
    assert_eq!(active(&bed), BackendName::Fallback);

    let err = bed.persistence.force_backend(BackendName::Primary).await.unwrap_err();
    assert!(matches!(
        err,
        OperatorError::TargetUnusable { backend: BackendName::Primary, state: ConnectionState::Disconnected }
    ));
    assert_eq!(active(&bed), BackendName::Fallback);
}

#[tokio::test]
async fn fallback_era_writes_stay_on_fallback() {
    let bed = running_bed().await;
    let repo = bed.persistence.repository().unwrap();

    bed.primary.set_down(true);
    ticks(&bed, 3).await;
    let written = repo.create("events", payload(json!({"kind": "outage"}))).await.unwrap();

    bed.primary.set_down(false);
    ticks(&bed, 2).await;
    assert_eq!(active(&bed), BackendName::Primary);

    assert!(repo.find_by_id("events", &written.id).await.unwrap().is_none());
    assert_eq!(repo.scan("events", None, 0, 10).await.unwrap().total, 0);
}

#[tokio::test]
async fn primary_migrations_catch_up_after_reconnect() {
    let bed = test_bed();
    bed.primary.set_down(true);
    let report = bed.persistence.initialize().await.unwrap();
    assert_eq!(report.active_backend, BackendName::Fallback);

    bed.primary.set_down(false);
    ticks(&bed, 2).await;
    assert_eq!(active(&bed), BackendName::Primary);

    let log = bed.persistence.handle(BackendName::Primary).migration_log().await.unwrap();
    assert!(!log.is_empty());
    assert!(log.iter().all(|r| r.success));

    let repo = bed.persistence.repository().unwrap();
    let created = repo.create("users", payload(json!({"name": "ada"}))).await.unwrap();
    assert_eq!(created.version, 1);
}
