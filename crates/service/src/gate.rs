//! Admission gate for repository calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dualstore_core::MAX_IN_FLIGHT_OPERATIONS;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::RepoError;

/// Each admitted call holds one permit; draining takes all of them.
#[derive(Debug)]
pub(crate) struct OperationGate {
    closed: AtomicBool,
    permits: Arc<Semaphore>,
}

impl OperationGate {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(MAX_IN_FLIGHT_OPERATIONS as usize)),
        }
    }

    pub(crate) async fn enter(&self) -> Result<OwnedSemaphorePermit, RepoError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RepoError::ShuttingDown);
        }
        Arc::clone(&self.permits).acquire_owned().await.map_err(|_| RepoError::ShuttingDown)
    }

    /// Reject every call from now on. Calls already admitted keep running.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Wait for admitted calls to finish, then refuse any still queued.
    pub(crate) async fn drain(&self) {
        match self.permits.acquire_many(MAX_IN_FLIGHT_OPERATIONS).await {
            Ok(all) => all.forget(),
            Err(_) => tracing::debug!("operation gate already drained"),
        }
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used, reason = "test code")]

    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn drain_waits_for_admitted_calls() {
        let gate = Arc::new(OperationGate::new());
        let permit = gate.enter().await.unwrap();
        gate.close();
        assert!(matches!(gate.enter().await, Err(RepoError::ShuttingDown)));

        let draining = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.drain().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!draining.is_finished());

        drop(permit);
        draining.await.unwrap();
        assert!(matches!(gate.enter().await, Err(RepoError::ShuttingDown)));
    }

    #[tokio::test]
    async fn drained_gate_refuses_even_if_never_closed() {
        let gate = OperationGate::new();
        gate.drain().await;
        assert!(matches!(gate.enter().await, Err(RepoError::ShuttingDown)));
    }
}
