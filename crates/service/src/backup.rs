//! Scheduled JSON-lines exports of the active backend.
//!
//! Each run writes `<dir>/<YYYYmmddTHHMMSSZ>-<backend>.jsonl` and records it in
//! `<dir>/manifest.json`. Expired artifacts are swept after every successful
//! run. A failed backup is reported and changes nothing else.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dualstore_core::{BackupConfig, BackupRecord, BackupSchedule, BACKUP_MANIFEST_FILE};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::BackupError;
use crate::failover::FailoverCoordinator;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io { path: path.to_path_buf(), source }
}

pub struct BackupScheduler {
    coordinator: Arc<FailoverCoordinator>,
    directory: PathBuf,
    schedule: BackupSchedule,
    retention: chrono::Duration,
    last: Mutex<Option<BackupRecord>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl BackupScheduler {
    pub fn new(coordinator: Arc<FailoverCoordinator>, config: &BackupConfig) -> Self {
        Self {
            coordinator,
            directory: config.directory.clone(),
            schedule: config.cron,
            retention: chrono::Duration::days(i64::from(config.retention_days)),
            last: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn schedule(&self) -> BackupSchedule {
        self.schedule
    }

    /// Newest backup taken or found in the manifest.
    pub fn last_backup(&self) -> Option<BackupRecord> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn manifest_path(&self) -> PathBuf {
        self.directory.join(BACKUP_MANIFEST_FILE)
    }

    async fn read_manifest(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let path = self.manifest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Write to a temp file and rename over the manifest.
    async fn write_manifest(&self, records: &[BackupRecord]) -> Result<(), BackupError> {
        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        Ok(())
    }

    /// Load the newest manifest entry so `last_backup` survives restarts.
    pub async fn restore_last(&self) -> Result<Option<BackupRecord>, BackupError> {
        let newest = self.read_manifest().await?.into_iter().max_by_key(|r| r.created_at);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = newest.clone();
        Ok(newest)
    }

    /// Create the artifact file, suffixing `-<n>` while the name is taken.
    async fn create_artifact(
        &self,
        now: DateTime<Utc>,
        backend: &str,
    ) -> Result<(PathBuf, tokio::fs::File), BackupError> {
        let stamp = now.format("%Y%m%dT%H%M%SZ");
        let mut n = 0u32;
        loop {
            let path = if n == 0 {
                self.directory.join(format!("{stamp}-{backend}.jsonl"))
            } else {
                self.directory.join(format!("{stamp}-{backend}-{n}.jsonl"))
            };
            let opened = OpenOptions::new().write(true).create_new(true).open(&path).await;
            match opened {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(io_error(&path)(e)),
            }
        }
    }

    /// Take one backup as of `now` from the backend active at call time.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<BackupRecord, BackupError> {
        let retained_until = now.checked_add_signed(self.retention).ok_or(
            BackupError::RetentionOutOfRange { from: now, days: self.retention.num_days() },
        )?;
        let _running = self.run_lock.lock().await;
        let handle = self.coordinator.active_handle();
        let records = handle.export_records().await?;

        tokio::fs::create_dir_all(&self.directory).await.map_err(io_error(&self.directory))?;
        let mut body = String::new();
        for record in &records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        let (path, mut file) = self.create_artifact(now, handle.name().as_str()).await?;
        file.write_all(body.as_bytes()).await.map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))?;

        let record = BackupRecord {
            created_at: now,
            source_backend: handle.name(),
            location: path.display().to_string(),
            size_bytes: body.len() as u64,
            record_count: records.len() as u64,
            retained_until,
        };

        let mut manifest = self.read_manifest().await?;
        manifest.push(record.clone());
        let removed = self.sweep_entries(&mut manifest, now).await;
        self.write_manifest(&manifest).await?;

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        tracing::info!(
            backend = %record.source_backend,
            records = record.record_count,
            bytes = record.size_bytes,
            swept = removed,
            location = %record.location,
            "backup written"
        );
        Ok(record)
    }

    /// Delete expired artifacts and drop their entries. Returns how many were removed.
    async fn sweep_entries(&self, manifest: &mut Vec<BackupRecord>, now: DateTime<Utc>) -> usize {
        let (expired, kept): (Vec<_>, Vec<_>) = manifest.drain(..).partition(|r| r.is_expired(now));
        *manifest = kept;
        for record in &expired {
            match tokio::fs::remove_file(&record.location).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    tracing::warn!(location = %record.location, error = %e, "failed to delete expired backup");
                },
            }
        }
        expired.len()
    }

    /// Spawns the schedule loop.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = scheduler.schedule.next_after(now);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!(next = %next, "next backup scheduled");
                tokio::select! {
                    () = tokio::time::sleep(wait) => {
                        if let Err(e) = scheduler.run_at(Utc::now()).await {
                            tracing::warn!(error = %e, "scheduled backup failed");
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("backup scheduler stopped");
        })
    }
}
