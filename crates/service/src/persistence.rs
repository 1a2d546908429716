//! Lifecycle facade tying handles, migrations, health, failover and backups together.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use dualstore_core::{
    BackendKind, BackendName, BackupRecord, ConnectionState, FailoverState, HealthSnapshot,
    PersistenceConfig, DEFAULT_BULK_TIMEOUT_MS,
};
use dualstore_storage::{
    BackendDriver, BackendHandle, HandleTimeouts, MigrationError, MigrationRunner, MigrationSet,
    PgDocumentStore, SqliteStore,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backup::BackupScheduler;
use crate::error::{InitError, OperatorError};
use crate::failover::FailoverCoordinator;
use crate::gate::OperationGate;
use crate::health::HealthMonitor;
use crate::repository::Repository;

/// Per-backend outcome of [`Persistence::initialize`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendReport {
    pub connected: bool,
    pub error: Option<String>,
    pub migrations_applied: usize,
    pub migration_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub primary: BackendReport,
    pub fallback: BackendReport,
    pub active_backend: BackendName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Both backends connected.
    Healthy,
    /// At least one backend usable, but not both connected.
    Degraded,
    /// No backend usable; repository calls fail with `Unavailable`.
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: BackendName,
    pub kind: BackendKind,
    pub target: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub health: Option<HealthSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub overall: OverallStatus,
    pub failover: Option<FailoverState>,
    pub backends: Vec<BackendStatus>,
    pub last_backup: Option<BackupRecord>,
}

/// Everything that exists only between `initialize` and `shutdown`.
struct Runtime {
    coordinator: Arc<FailoverCoordinator>,
    monitor: Arc<HealthMonitor>,
    backups: Arc<BackupScheduler>,
    gate: Arc<OperationGate>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum Phase {
    Created,
    Running(Arc<Runtime>),
    ShutDown,
}

pub struct Persistence {
    config: PersistenceConfig,
    primary: Arc<BackendHandle>,
    fallback: Arc<BackendHandle>,
    runner: MigrationRunner,
    /// Serializes initialize and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
    phase: RwLock<Phase>,
}

fn timeouts(connect_ms: u64, ping_ms: u64, config: &PersistenceConfig) -> HandleTimeouts {
    HandleTimeouts {
        connect: Duration::from_millis(connect_ms),
        ping: Duration::from_millis(ping_ms),
        operation: config.operation_timeout(),
        bulk: Duration::from_millis(DEFAULT_BULK_TIMEOUT_MS),
    }
}

impl Persistence {
    /// Build the PostgreSQL primary and SQLite fallback from `config`. Nothing connects yet.
    pub fn new(config: PersistenceConfig) -> Result<Self, InitError> {
        let primary = Arc::new(PgDocumentStore::new(config.primary.connection_string.clone()));
        let fallback = Arc::new(SqliteStore::new(config.fallback.storage_path.clone()));
        Self::with_drivers(config, primary, fallback)
    }

    /// Same as [`Self::new`] with caller-supplied drivers.
    pub fn with_drivers(
        config: PersistenceConfig,
        primary: Arc<dyn BackendDriver>,
        fallback: Arc<dyn BackendDriver>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let set = match &config.migrations.source_directory {
            Some(dir) => MigrationSet::with_directory(dir)?,
            None => MigrationSet::builtin(),
        };
        let primary = Arc::new(BackendHandle::new(
            BackendName::Primary,
            primary,
            timeouts(config.primary.connect_timeout_ms, config.primary.ping_timeout_ms, &config),
        ));
        let fallback = Arc::new(BackendHandle::new(
            BackendName::Fallback,
            fallback,
            timeouts(config.fallback.connect_timeout_ms, config.fallback.ping_timeout_ms, &config),
        ));
        Ok(Self {
            config,
            primary,
            fallback,
            runner: MigrationRunner::new(set),
            lifecycle: tokio::sync::Mutex::new(()),
            phase: RwLock::new(Phase::Created),
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Available in every phase.
    pub fn handle(&self, name: BackendName) -> &Arc<BackendHandle> {
        match name {
            BackendName::Primary => &self.primary,
            BackendName::Fallback => &self.fallback,
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, InitError> {
        match &*self.phase.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Created => Err(InitError::NotInitialized),
            Phase::Running(runtime) => Ok(Arc::clone(runtime)),
            Phase::ShutDown => Err(InitError::ShutDown),
        }
    }

    async fn migrate_at_startup(&self, handle: &BackendHandle, report: &mut BackendReport) {
        match self.runner.migrate(handle).await {
            Ok(applied) => report.migrations_applied = applied,
            Err(e) => {
                if let MigrationError::Failed { applied, .. } = &e {
                    report.migrations_applied = *applied;
                }
                if handle.name() == BackendName::Fallback {
                    tracing::error!(backend = %handle.name(), error = %e, "fallback migrations failed");
                } else {
                    tracing::warn!(backend = %handle.name(), error = %e, "primary migrations failed");
                }
                report.migration_error = Some(e.to_string());
            },
        }
    }

    /// Connect, migrate, pick the initial backend and start the timers.
    ///
    /// Fails only when neither backend connects. May be retried after that
    /// failure, but not after success or shutdown.
    pub async fn initialize(&self) -> Result<InitReport, InitError> {
        let _lifecycle = self.lifecycle.lock().await;
        match &*self.phase.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Created => {},
            Phase::Running(_) => return Err(InitError::AlreadyInitialized),
            Phase::ShutDown => return Err(InitError::ShutDown),
        }

        tracing::info!(
            primary = %self.primary.describe(),
            fallback = %self.fallback.describe(),
            "initializing persistence"
        );
        let (primary_conn, fallback_conn) = tokio::join!(self.primary.connect(), self.fallback.connect());
        let mut primary = BackendReport::default();
        let mut fallback = BackendReport::default();

        match (primary_conn, fallback_conn) {
            (Err(p), Err(f)) => {
                tracing::error!(primary = %p, fallback = %f, "both backends failed to connect");
                return Err(InitError::BothBackendsDown { primary: p.to_string(), fallback: f.to_string() });
            },
            (p, f) => {
                match p {
                    Ok(()) => primary.connected = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "primary failed to connect");
                        primary.error = Some(e.to_string());
                    },
                }
                match f {
                    Ok(()) => fallback.connected = true,
                    Err(e) => {
                        tracing::error!(error = %e, "fallback failed to connect");
                        fallback.error = Some(e.to_string());
                    },
                }
            },
        }

        if primary.connected {
            self.migrate_at_startup(&self.primary, &mut primary).await;
        }
        if fallback.connected {
            self.migrate_at_startup(&self.fallback, &mut fallback).await;
        }

        let initial = if self.primary.is_usable() && primary.migration_error.is_none() {
            BackendName::Primary
        } else if self.fallback.is_usable() {
            BackendName::Fallback
        } else {
            BackendName::Primary
        };

        let health = &self.config.health;
        let coordinator = Arc::new(FailoverCoordinator::new(
            Arc::clone(&self.primary),
            Arc::clone(&self.fallback),
            health.failover_threshold,
            health.failback_threshold,
            initial,
        ));
        let monitor = HealthMonitor::new(
            vec![Arc::clone(&self.primary), Arc::clone(&self.fallback)],
            health.failover_threshold,
            health.log_capacity,
        )
        .with_migrations(self.runner.clone());
        for (name, report) in [(BackendName::Primary, &primary), (BackendName::Fallback, &fallback)] {
            if report.migration_error.is_some() {
                monitor.mark_schema_stale(name);
            }
        }
        let monitor = Arc::new(monitor);
        monitor.add_observer(coordinator.clone());
        monitor.probe_now().await;

        let backups = Arc::new(BackupScheduler::new(Arc::clone(&coordinator), &self.config.backup));
        if let Err(e) = backups.restore_last().await {
            tracing::warn!(error = %e, "could not read backup manifest");
        }

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            monitor.spawn(self.config.health_interval(), stop_rx.clone()),
            backups.spawn(stop_rx),
        ];
        let runtime = Runtime {
            coordinator: Arc::clone(&coordinator),
            monitor,
            backups,
            gate: Arc::new(OperationGate::new()),
            stop,
            tasks: Mutex::new(tasks),
        };
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = Phase::Running(Arc::new(runtime));

        let report = InitReport { primary, fallback, active_backend: coordinator.current_backend() };
        tracing::info!(active = %report.active_backend, "persistence initialized");
        Ok(report)
    }

    pub fn repository(&self) -> Result<Repository, InitError> {
        let runtime = self.runtime()?;
        Ok(Repository::new(Arc::clone(&runtime.coordinator), Arc::clone(&runtime.gate)))
    }

    /// Point-in-time view; never waits on I/O.
    pub fn status(&self) -> StatusReport {
        let runtime = self.runtime().ok();
        let backends = BackendName::ALL
            .iter()
            .map(|&name| {
                let handle = self.handle(name);
                BackendStatus {
                    name,
                    kind: handle.kind(),
                    target: handle.describe(),
                    state: handle.state(),
                    last_error: handle.last_error(),
                    health: runtime.as_ref().and_then(|r| r.monitor.latest(name)),
                }
            })
            .collect::<Vec<_>>();

        let overall = if backends.iter().all(|b| b.state == ConnectionState::Connected) {
            OverallStatus::Healthy
        } else if backends.iter().any(|b| b.state.is_usable()) {
            OverallStatus::Degraded
        } else {
            OverallStatus::Down
        };

        StatusReport {
            overall,
            failover: runtime.as_ref().map(|r| (*r.coordinator.state()).clone()),
            backends,
            last_backup: runtime.as_ref().and_then(|r| r.backups.last_backup()),
        }
    }

    pub fn health_log(&self) -> Result<Vec<HealthSnapshot>, InitError> {
        Ok(self.runtime()?.monitor.recent_log())
    }

    pub fn subscribe_failover(&self) -> Result<broadcast::Receiver<FailoverState>, InitError> {
        Ok(self.runtime()?.coordinator.subscribe())
    }

    pub async fn force_backend(&self, target: BackendName) -> Result<FailoverState, OperatorError> {
        let runtime = self.runtime()?;
        Ok((*runtime.coordinator.force(target)?).clone())
    }

    /// Run pending migrations on one backend; returns how many were applied.
    pub async fn migrate(&self, name: BackendName) -> Result<usize, OperatorError> {
        let handle = self.handle(name);
        if !handle.is_usable() {
            return Err(OperatorError::TargetUnusable { backend: name, state: handle.state() });
        }
        Ok(self.runner.migrate(handle).await?)
    }

    /// Unblock migrations on `name` after a failed attempt; returns the clearance watermark.
    pub async fn clear_migration_failure(&self, name: BackendName) -> Result<i64, OperatorError> {
        let handle = self.handle(name);
        if !handle.is_usable() {
            return Err(OperatorError::TargetUnusable { backend: name, state: handle.state() });
        }
        Ok(self.runner.clear_failure(handle).await?)
    }

    pub async fn backup_now(&self) -> Result<BackupRecord, OperatorError> {
        let runtime = self.runtime()?;
        Ok(runtime.backups.run_at(Utc::now()).await?)
    }

    pub async fn probe_now(&self) -> Result<Vec<HealthSnapshot>, InitError> {
        let runtime = self.runtime()?;
        Ok(runtime.monitor.probe_now().await)
    }

    /// Stop accepting calls, stop the timers, wait for in-flight calls, disconnect.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(
            &mut *self.phase.write().unwrap_or_else(PoisonError::into_inner),
            Phase::ShutDown,
        );
        let runtime = match previous {
            Phase::Running(runtime) => Some(runtime),
            Phase::Created => None,
            Phase::ShutDown => return,
        };

        if let Some(runtime) = runtime {
            tracing::info!("shutting down persistence");
            runtime.gate.close();
            if runtime.stop.send(true).is_err() {
                tracing::debug!("timers already stopped");
            }
            let tasks = std::mem::take(&mut *runtime.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "background task ended abnormally");
                }
            }
            runtime.gate.drain().await;
        }

        tokio::join!(self.primary.disconnect(), self.fallback.disconnect());
        tracing::info!("persistence shut down");
    }
}
