//! Periodic liveness probing of every backend.
//!
//! The monitor only observes: it builds [`HealthSnapshot`]s and hands them to
//! registered [`HealthObserver`]s once every probe of a tick has finished.
//! With a [`MigrationRunner`] attached, a backend whose schema may be behind
//! (it just reconnected, or its last migration failed) is migrated before it
//! is pinged, and counts as unreachable until that succeeds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use dualstore_core::{BackendName, ConnectionState, HealthSnapshot};
use dualstore_storage::{BackendHandle, MigrationRunner};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives every tick's snapshots, in backend order, after all probes finished.
pub trait HealthObserver: Send + Sync {
    fn on_tick(&self, snapshots: &[HealthSnapshot]);
}

pub struct HealthMonitor {
    handles: Vec<Arc<BackendHandle>>,
    failover_threshold: u32,
    latest: RwLock<BTreeMap<BackendName, HealthSnapshot>>,
    log: Mutex<VecDeque<HealthSnapshot>>,
    log_capacity: usize,
    observers: RwLock<Vec<Arc<dyn HealthObserver>>>,
    migrations: Option<MigrationRunner>,
    stale_schema: Mutex<BTreeSet<BackendName>>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    pub fn new(handles: Vec<Arc<BackendHandle>>, failover_threshold: u32, log_capacity: usize) -> Self {
        Self {
            handles,
            failover_threshold,
            latest: RwLock::new(BTreeMap::new()),
            log: Mutex::new(VecDeque::with_capacity(log_capacity)),
            log_capacity,
            observers: RwLock::new(Vec::new()),
            migrations: None,
            stale_schema: Mutex::new(BTreeSet::new()),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_migrations(mut self, runner: MigrationRunner) -> Self {
        self.migrations = Some(runner);
        self
    }

    /// Migrate `name` before its next ping.
    pub fn mark_schema_stale(&self, name: BackendName) {
        self.stale_schema.lock().unwrap_or_else(PoisonError::into_inner).insert(name);
    }

    fn schema_stale(&self, name: BackendName) -> bool {
        self.stale_schema.lock().unwrap_or_else(PoisonError::into_inner).contains(&name)
    }

    /// Disconnected handles get a reconnect attempt before the ping.
    async fn probe(&self, handle: &BackendHandle) -> Result<u64, String> {
        let name = handle.name();
        if handle.state() == ConnectionState::Disconnected {
            handle.connect().await.map_err(|e| e.to_string())?;
            self.mark_schema_stale(name);
        }
        if let Some(runner) = &self.migrations {
            if self.schema_stale(name) {
                runner.migrate(handle).await.map_err(|e| format!("schema not current: {e}"))?;
                self.stale_schema.lock().unwrap_or_else(PoisonError::into_inner).remove(&name);
            }
        }
        handle.ping().await.map_err(|e| e.to_string())
    }

    pub fn add_observer(&self, observer: Arc<dyn HealthObserver>) {
        self.observers.write().unwrap_or_else(PoisonError::into_inner).push(observer);
    }

    /// Latest snapshot of `name`, if it has been probed.
    pub fn latest(&self, name: BackendName) -> Option<HealthSnapshot> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).get(&name).cloned()
    }

    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Rolling diagnostic log, oldest first.
    pub fn recent_log(&self) -> Vec<HealthSnapshot> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// Run one tick: probe every backend concurrently, then publish.
    pub async fn probe_now(&self) -> Vec<HealthSnapshot> {
        let _tick = self.tick_lock.lock().await;

        let results = join_all(self.handles.iter().map(|handle| self.probe(handle))).await;
        let observed_at = Utc::now();

        let mut snapshots = Vec::with_capacity(self.handles.len());
        for (handle, result) in self.handles.iter().zip(results) {
            let previous = self.latest(handle.name());
            let snapshot = HealthSnapshot::observe(previous.as_ref(), handle.name(), result, observed_at);

            if let Some(error) = &snapshot.error {
                tracing::warn!(
                    backend = %handle.name(),
                    failures = snapshot.consecutive_failures,
                    error = %error,
                    "health probe failed"
                );
                if snapshot.consecutive_failures >= self.failover_threshold
                    && handle.state() == ConnectionState::Degraded
                {
                    handle.mark_disconnected(error).await;
                }
            }
            snapshots.push(snapshot);
        }

        self.record(&snapshots);
        tracing::debug!(
            probes = snapshots.len(),
            reachable = snapshots.iter().filter(|s| s.reachable).count(),
            "health tick"
        );

        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner).clone();
        for observer in observers {
            observer.on_tick(&snapshots);
        }
        snapshots
    }

    fn record(&self, snapshots: &[HealthSnapshot]) {
        {
            let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            for snapshot in snapshots {
                latest.insert(snapshot.backend_name, snapshot.clone());
            }
        }
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        for snapshot in snapshots {
            if log.len() == self.log_capacity {
                log.pop_front();
            }
            log.push_back(snapshot.clone());
        }
    }

    /// Spawns the probe loop. The first tick fires one `interval` from now.
    pub fn spawn(self: &Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.probe_now().await;
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("health monitor stopped");
        })
    }
}
