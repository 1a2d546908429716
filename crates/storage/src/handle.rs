//! Uniform, state-tracking wrapper around one backend driver.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dualstore_core::{
    BackendKind, BackendName, ConnectionState, DomainRecord, MigrationRecord,
    DEFAULT_BULK_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_OPERATION_TIMEOUT_MS,
    DEFAULT_PING_TIMEOUT_MS,
};
use tokio::sync::broadcast;

use crate::driver::{BackendDriver, Operation, RawResult};
use crate::error::{BackendError, ConnectError, PingError};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Per-handle I/O bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleTimeouts {
    pub connect: Duration,
    pub ping: Duration,
    pub operation: Duration,
    pub bulk: Duration,
}

impl Default for HandleTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            ping: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            operation: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            bulk: Duration::from_millis(DEFAULT_BULK_TIMEOUT_MS),
        }
    }
}

/// Published on every connection state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub backend: BackendName,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

/// One backend with its connection state machine.
///
/// Created once at startup and shared by `Arc`. The state only moves along
/// the edges allowed by [`ConnectionState::can_transition_to`].
#[derive(Debug)]
pub struct BackendHandle {
    name: BackendName,
    driver: Arc<dyn BackendDriver>,
    timeouts: HandleTimeouts,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    transitions: broadcast::Sender<StateTransition>,
    migration_lock: tokio::sync::Mutex<()>,
}

impl BackendHandle {
    pub fn new(name: BackendName, driver: Arc<dyn BackendDriver>, timeouts: HandleTimeouts) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            name,
            driver,
            timeouts,
            state: Mutex::new(ConnectionState::Disconnected),
            last_error: Mutex::new(None),
            transitions,
            migration_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> BackendName {
        self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    pub fn describe(&self) -> String {
        self.driver.describe()
    }

    pub fn timeouts(&self) -> HandleTimeouts {
        self.timeouts
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_usable(&self) -> bool {
        self.state().is_usable()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Receive every subsequent state transition of this handle.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    fn record_error(&self, error: Option<String>) {
        if error.is_some() {
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
        }
    }

    /// Move to `to` if `guard` accepts the current state and the edge is legal.
    fn transition_if(
        &self,
        guard: impl FnOnce(ConnectionState) -> bool,
        to: ConnectionState,
        error: Option<String>,
    ) -> bool {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            if !guard(from) {
                return false;
            }
            if !from.can_transition_to(to) {
                tracing::warn!(backend = %self.name, %from, %to, "rejected illegal state transition");
                return false;
            }
            *state = to;
            from
        };
        self.record_error(error.clone());
        tracing::debug!(backend = %self.name, %from, %to, "backend state changed");
        let event = StateTransition { backend: self.name, from, to, at: Utc::now(), error };
        if self.transitions.send(event).is_err() {
            tracing::trace!(backend = %self.name, "no transition subscribers");
        }
        true
    }

    /// Establish the connection. A no-op when already connected or degraded.
    ///
    /// On refusal or timeout the handle ends up `Disconnected` with
    /// `last_error` set; the caller decides when to try again.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut current = ConnectionState::Disconnected;
        let claimed = self.transition_if(
            |state| {
                current = state;
                state == ConnectionState::Disconnected
            },
            ConnectionState::Connecting,
            None,
        );
        if !claimed {
            return match current {
                ConnectionState::Connecting => Err(ConnectError::InProgress),
                _ => Ok(()),
            };
        }

        let limit = self.timeouts.connect;
        let result = match tokio::time::timeout(limit, self.driver.connect(limit)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                self.transition_if(|_| true, ConnectionState::Connected, None);
                tracing::info!(backend = %self.name, target = %self.describe(), "backend connected");
                Ok(())
            },
            Err(e) => {
                self.driver.disconnect().await;
                self.transition_if(|_| true, ConnectionState::Disconnected, Some(e.to_string()));
                tracing::warn!(backend = %self.name, error = %e, "backend connect failed");
                Err(e)
            },
        }
    }

    /// Close the native connection and move to `Disconnected`.
    pub async fn mark_disconnected(&self, reason: &str) {
        let moved = self.transition_if(
            ConnectionState::is_usable,
            ConnectionState::Disconnected,
            Some(reason.to_owned()),
        );
        if moved {
            self.driver.disconnect().await;
            tracing::warn!(backend = %self.name, reason, "backend marked disconnected");
        }
    }

    pub async fn disconnect(&self) {
        self.mark_disconnected("shutdown").await;
    }

    /// Liveness probe. Returns round-trip latency in milliseconds.
    ///
    /// Success heals a degraded handle; failure degrades a connected one.
    pub async fn ping(&self) -> Result<u64, PingError> {
        if !self.is_usable() {
            return Err(PingError::NotConnected);
        }
        let limit = self.timeouts.ping;
        let started = Instant::now();
        let result = match tokio::time::timeout(limit, self.driver.ping()).await {
            Ok(result) => result,
            Err(_) => Err(PingError::Timeout(limit)),
        };
        match result {
            Ok(()) => {
                let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.transition_if(
                    |state| state == ConnectionState::Degraded,
                    ConnectionState::Connected,
                    None,
                );
                Ok(latency)
            },
            Err(e) => {
                let message = e.to_string();
                let degraded = self.transition_if(
                    |state| state == ConnectionState::Connected,
                    ConnectionState::Degraded,
                    Some(message.clone()),
                );
                if !degraded {
                    self.record_error(Some(message));
                }
                Err(e)
            },
        }
    }

    fn unavailable(&self) -> BackendError {
        BackendError::Unavailable(format!("{} backend is {}", self.name, self.state()))
    }

    async fn bounded<T>(
        &self,
        limit: Duration,
        work: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        if !self.is_usable() {
            return Err(self.unavailable());
        }
        let result = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit)),
        };
        if let Err(e) = &result {
            if e.is_transient() {
                self.transition_if(
                    |state| state == ConnectionState::Connected,
                    ConnectionState::Degraded,
                    Some(e.to_string()),
                );
            }
        }
        result
    }

    /// Run one data operation against this backend.
    ///
    /// Fails fast with `Unavailable` when the handle is not usable. Timeouts
    /// are not retried.
    pub async fn execute(&self, operation: Operation) -> Result<RawResult, BackendError> {
        let op = operation.name();
        let result = self.bounded(self.timeouts.operation, self.driver.execute(operation)).await;
        if let Err(e) = &result {
            tracing::debug!(backend = %self.name, op, error = %e, "operation failed");
        }
        result
    }

    pub async fn export_records(&self) -> Result<Vec<DomainRecord>, BackendError> {
        self.bounded(self.timeouts.bulk, self.driver.export_records()).await
    }

    pub(crate) fn migration_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.migration_lock
    }

    pub(crate) async fn apply_migration_sql(&self, sql: &str) -> Result<(), BackendError> {
        self.bounded(self.timeouts.bulk, self.driver.apply_migration_sql(sql)).await
    }

    pub async fn migration_log(&self) -> Result<Vec<MigrationRecord>, BackendError> {
        self.bounded(self.timeouts.operation, self.driver.migration_log()).await
    }

    pub(crate) async fn append_migration_record(
        &self,
        record: &MigrationRecord,
    ) -> Result<i64, BackendError> {
        self.bounded(self.timeouts.operation, self.driver.append_migration_record(record)).await
    }

    pub(crate) async fn migration_clearance(&self) -> Result<i64, BackendError> {
        self.bounded(self.timeouts.operation, self.driver.migration_clearance()).await
    }

    pub(crate) async fn clear_migration_failures(&self) -> Result<i64, BackendError> {
        self.bounded(self.timeouts.operation, self.driver.clear_migration_failures()).await
    }
}
