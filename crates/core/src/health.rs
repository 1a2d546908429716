//! Health, failover, migration and backup bookkeeping types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendName;

/// Latest liveness observation for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub backend_name: BackendName,
    pub observed_at: DateTime<Utc>,
    pub reachable: bool,
    /// Present only when `reachable`.
    pub latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub error: Option<String>,
}

impl HealthSnapshot {
    /// Build the snapshot that follows `previous` after one probe.
    ///
    /// A reachable probe zeroes the failure streak, an unreachable one zeroes
    /// the success streak.
    #[must_use]
    pub fn observe(
        previous: Option<&Self>,
        backend_name: BackendName,
        probe: Result<u64, String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let (failures, successes) =
            previous.map_or((0, 0), |p| (p.consecutive_failures, p.consecutive_successes));
        match probe {
            Ok(latency_ms) => Self {
                backend_name,
                observed_at,
                reachable: true,
                latency_ms: Some(latency_ms),
                consecutive_failures: 0,
                consecutive_successes: successes.saturating_add(1),
                error: None,
            },
            Err(error) => Self {
                backend_name,
                observed_at,
                reachable: false,
                latency_ms: None,
                consecutive_failures: failures.saturating_add(1),
                consecutive_successes: 0,
                error: Some(error),
            },
        }
    }
}

/// Why the active backend is what it is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverReason {
    Initial,
    HealthTriggered,
    Manual,
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initial => "initial",
            Self::HealthTriggered => "health-triggered",
            Self::Manual => "manual",
        })
    }
}

/// Current active-backend decision. Replaced whole on every switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverState {
    pub active_backend: BackendName,
    pub reason: FailoverReason,
    pub since: DateTime<Utc>,
}

impl FailoverState {
    #[must_use]
    pub fn new(active_backend: BackendName, reason: FailoverReason) -> Self {
        Self { active_backend, reason, since: Utc::now() }
    }
}

/// One migration attempt, successful or not. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Append sequence assigned by the migration log; 0 before persisting.
    pub attempt: i64,
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Manifest entry describing one backup artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub created_at: DateTime<Utc>,
    pub source_backend: BackendName,
    pub location: String,
    pub size_bytes: u64,
    pub record_count: u64,
    pub retained_until: DateTime<Utc>,
}

impl BackupRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retained_until <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_and_reset_on_success() {
        let now = Utc::now();
        let first = HealthSnapshot::observe(None, BackendName::Primary, Err("refused".into()), now);
        let second =
            HealthSnapshot::observe(Some(&first), BackendName::Primary, Err("refused".into()), now);
        assert_eq!(second.consecutive_failures, 2);
        assert_eq!(second.consecutive_successes, 0);
        assert!(second.latency_ms.is_none());

        let third = HealthSnapshot::observe(Some(&second), BackendName::Primary, Ok(4), now);
        assert!(third.reachable);
        assert_eq!(third.consecutive_failures, 0);
        assert_eq!(third.consecutive_successes, 1);
        assert_eq!(third.latency_ms, Some(4));
        assert!(third.error.is_none());
    }

    #[test]
    fn backup_expiry_is_inclusive() {
        let now = Utc::now();
        let record = BackupRecord {
            created_at: now,
            source_backend: BackendName::Fallback,
            location: "x.jsonl".into(),
            size_bytes: 0,
            record_count: 0,
            retained_until: now,
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - chrono::Duration::seconds(1)));
    }
}
