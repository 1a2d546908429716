use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dualstore_core::MigrationRecord;

use super::MigrationSet;
use crate::error::MigrationError;
use crate::handle::BackendHandle;

/// Highest version with a successful attempt, 0 when nothing was applied.
pub(crate) fn applied_version(log: &[MigrationRecord]) -> u32 {
    log.iter().filter(|r| r.success).map(|r| r.version).max().unwrap_or(0)
}

/// Latest failed attempt above `applied` that no clearance covers.
pub(crate) fn blocking_failure(
    log: &[MigrationRecord],
    applied: u32,
    clearance: i64,
) -> Option<&MigrationRecord> {
    log.iter()
        .filter(|r| !r.success && r.version > applied && r.attempt > clearance)
        .max_by_key(|r| r.attempt)
}

/// Applies a [`MigrationSet`] to backend handles, one run per handle at a time.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    set: Arc<MigrationSet>,
}

impl MigrationRunner {
    pub fn new(set: MigrationSet) -> Self {
        Self { set: Arc::new(set) }
    }

    pub fn set(&self) -> &MigrationSet {
        &self.set
    }

    /// Apply every pending migration in order; returns how many were applied.
    ///
    /// Stops at the first failure, which is logged as an attempt and blocks
    /// later runs until [`Self::clear_failure`].
    pub async fn migrate(&self, handle: &BackendHandle) -> Result<usize, MigrationError> {
        let _guard = handle.migration_lock().lock().await;
        let backend = handle.name();

        let log = handle.migration_log().await?;
        let current = applied_version(&log);
        let clearance = handle.migration_clearance().await?;
        if let Some(failed) = blocking_failure(&log, current, clearance) {
            return Err(MigrationError::Blocked {
                version: failed.version,
                error: failed.error.clone().unwrap_or_default(),
            });
        }

        tracing::info!(
            %backend,
            "Database schema version: {} (target: {})",
            current,
            self.set.latest_version()
        );

        let mut applied = 0usize;
        for migration in self.set.pending(current) {
            let applied_at = Utc::now();
            let started = Instant::now();
            let result = match migration.sql_for(handle.kind()) {
                Some(sql) => handle.apply_migration_sql(sql).await,
                None => Ok(()),
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let record = MigrationRecord {
                attempt: 0,
                version: migration.version,
                name: migration.name.clone(),
                applied_at,
                duration_ms,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            };
            let logged = handle.append_migration_record(&record).await;

            match result {
                Ok(()) => {
                    logged?;
                    applied += 1;
                    tracing::info!(
                        %backend,
                        version = migration.version,
                        duration_ms,
                        "Applied migration v{}: {}",
                        migration.version,
                        migration.name
                    );
                },
                Err(e) => {
                    if let Err(log_err) = logged {
                        tracing::warn!(%backend, error = %log_err, "could not log failed migration");
                    }
                    return Err(MigrationError::Failed {
                        version: migration.version,
                        name: migration.name.clone(),
                        applied,
                        error: e.to_string(),
                    });
                },
            }
        }

        if applied > 0 {
            tracing::info!(%backend, version = self.set.latest_version(), "Database schema up to date");
        }
        Ok(applied)
    }

    /// Operator action: unblock migrations after a failure was investigated.
    /// Returns the highest attempt number the clearance covers.
    pub async fn clear_failure(&self, handle: &BackendHandle) -> Result<i64, MigrationError> {
        let _guard = handle.migration_lock().lock().await;
        let through = handle.clear_migration_failures().await?;
        tracing::info!(backend = %handle.name(), cleared_through = through, "migration failures cleared");
        Ok(through)
    }

    /// Highest successfully applied version on `handle`.
    pub async fn applied_version(&self, handle: &BackendHandle) -> Result<u32, MigrationError> {
        Ok(applied_version(&handle.migration_log().await?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn attempt(attempt: i64, version: u32, success: bool) -> MigrationRecord {
        MigrationRecord {
            attempt,
            version,
            name: format!("v{version}"),
            applied_at: Utc::now(),
            duration_ms: 1,
            success,
            error: (!success).then(|| "boom".to_owned()),
        }
    }

    #[test]
    fn failure_blocks_until_cleared() {
        let log = vec![attempt(1, 1, true), attempt(2, 2, false)];
        assert_eq!(applied_version(&log), 1);
        assert_eq!(blocking_failure(&log, 1, 0).map(|r| r.attempt), Some(2));
        assert!(blocking_failure(&log, 1, 2).is_none());
    }

    #[test]
    fn failure_below_applied_version_does_not_block() {
        let log = vec![attempt(1, 1, false), attempt(2, 1, true), attempt(3, 2, true)];
        assert_eq!(applied_version(&log), 2);
        assert!(blocking_failure(&log, 2, 0).is_none());
    }

    #[test]
    fn failure_after_clearance_blocks_again() {
        let log = vec![attempt(1, 1, true), attempt(2, 2, false), attempt(3, 2, false)];
        assert_eq!(blocking_failure(&log, 1, 2).map(|r| r.attempt), Some(3));
    }
}
