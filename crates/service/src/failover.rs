//! Active-backend selection with hysteresis.
//!
//! Decisions are made from whole health ticks: the primary must fail
//! `failover_threshold` probes in a row before traffic moves to the fallback,
//! and succeed `failback_threshold` probes in a row before it moves back.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dualstore_core::{BackendName, ConnectionState, FailoverReason, FailoverState, HealthSnapshot};
use dualstore_storage::BackendHandle;
use tokio::sync::broadcast;

use crate::error::OperatorError;
use crate::health::HealthObserver;

const FAILOVER_CHANNEL_CAPACITY: usize = 16;

pub struct FailoverCoordinator {
    primary: Arc<BackendHandle>,
    fallback: Arc<BackendHandle>,
    failover_threshold: u32,
    failback_threshold: u32,
    state: RwLock<Arc<FailoverState>>,
    /// Target of the last manual switch while automatic hysteresis is suspended.
    manual_override: Mutex<Option<BackendName>>,
    changes: broadcast::Sender<FailoverState>,
}

impl FailoverCoordinator {
    pub fn new(
        primary: Arc<BackendHandle>,
        fallback: Arc<BackendHandle>,
        failover_threshold: u32,
        failback_threshold: u32,
        initial: BackendName,
    ) -> Self {
        let (changes, _) = broadcast::channel(FAILOVER_CHANNEL_CAPACITY);
        tracing::info!(active = %initial, "initial active backend");
        Self {
            primary,
            fallback,
            failover_threshold,
            failback_threshold,
            state: RwLock::new(Arc::new(FailoverState::new(initial, FailoverReason::Initial))),
            manual_override: Mutex::new(None),
            changes,
        }
    }

    /// Never waits on I/O: clones the current `Arc`.
    pub fn state(&self) -> Arc<FailoverState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn current_backend(&self) -> BackendName {
        self.state().active_backend
    }

    pub fn handle(&self, name: BackendName) -> &Arc<BackendHandle> {
        match name {
            BackendName::Primary => &self.primary,
            BackendName::Fallback => &self.fallback,
        }
    }

    pub fn active_handle(&self) -> Arc<BackendHandle> {
        Arc::clone(self.handle(self.current_backend()))
    }

    /// Receive every subsequent switch.
    pub fn subscribe(&self) -> broadcast::Receiver<FailoverState> {
        self.changes.subscribe()
    }

    fn switch(&self, to: BackendName, reason: FailoverReason, why: &str) -> Arc<FailoverState> {
        let next = Arc::new(FailoverState::new(to, reason));
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, Arc::clone(&next))
        };
        if previous.active_backend != to {
            tracing::warn!(from = %previous.active_backend, %to, %reason, why, "active backend switched");
        } else {
            tracing::info!(backend = %to, %reason, why, "active backend confirmed");
        }
        if self.changes.send((*next).clone()).is_err() {
            tracing::trace!("no failover subscribers");
        }
        next
    }

    /// Operator switch. Suspends automatic hysteresis until the primary's
    /// health moves against the forced choice.
    pub fn force(&self, target: BackendName) -> Result<Arc<FailoverState>, OperatorError> {
        let handle = self.handle(target);
        if !handle.is_usable() {
            return Err(OperatorError::TargetUnusable { backend: target, state: handle.state() });
        }
        *self.manual_override.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
        Ok(self.switch(target, FailoverReason::Manual, "operator request"))
    }

    /// Whether an override is still in force after this tick's primary snapshot.
    fn override_active(&self, primary: Option<&HealthSnapshot>) -> bool {
        let mut forced = self.manual_override.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(target) = *forced else {
            return false;
        };
        let reversed = match (target, primary) {
            (BackendName::Fallback, Some(p)) => !p.reachable,
            (BackendName::Primary, Some(p)) => p.reachable,
            (_, None) => false,
        };
        if reversed {
            tracing::info!(forced = %target, "manual override lifted by primary health change");
            *forced = None;
        }
        !reversed
    }

    fn clear_override(&self) {
        *self.manual_override.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn evaluate(&self, snapshots: &[HealthSnapshot]) {
        let find = |name| snapshots.iter().find(|s| s.backend_name == name);
        let primary = find(BackendName::Primary);
        let fallback = find(BackendName::Fallback);
        let current = self.current_backend();
        let suspended = self.override_active(primary);

        // Safety rule: never keep serving from a disconnected backend.
        let other = current.other();
        if self.handle(current).state() == ConnectionState::Disconnected
            && self.handle(other).is_usable()
        {
            self.clear_override();
            self.switch(other, FailoverReason::HealthTriggered, "active backend disconnected");
            return;
        }
        if suspended {
            return;
        }

        match current {
            BackendName::Primary => {
                let primary_failing =
                    primary.is_some_and(|p| p.consecutive_failures >= self.failover_threshold);
                let fallback_ready =
                    fallback.is_some_and(|f| f.reachable) && self.fallback.is_usable();
                if primary_failing && fallback_ready {
                    self.switch(
                        BackendName::Fallback,
                        FailoverReason::HealthTriggered,
                        "primary failure threshold reached",
                    );
                }
            },
            BackendName::Fallback => {
                let primary_recovered =
                    primary.is_some_and(|p| p.consecutive_successes >= self.failback_threshold);
                if primary_recovered && self.primary.is_usable() {
                    self.switch(
                        BackendName::Primary,
                        FailoverReason::HealthTriggered,
                        "primary recovered",
                    );
                }
            },
        }
    }
}

impl HealthObserver for FailoverCoordinator {
    fn on_tick(&self, snapshots: &[HealthSnapshot]) {
        self.evaluate(snapshots);
    }
}
