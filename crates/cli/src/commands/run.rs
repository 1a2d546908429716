//! Foreground mode: keep the persistence layer alive until Ctrl-C.

use anyhow::Result;
use dualstore_core::BackendName;
use dualstore_service::Persistence;
use tokio::sync::broadcast::error::RecvError;

pub(crate) async fn run(persistence: &Persistence) -> Result<()> {
    let mut failovers = persistence.subscribe_failover()?;
    let mut primary = persistence.handle(BackendName::Primary).subscribe();
    let mut fallback = persistence.handle(BackendName::Fallback).subscribe();
    let status = persistence.status();
    tracing::info!(
        overall = ?status.overall,
        active = ?status.failover.map(|f| f.active_backend),
        "dualstore running, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("received Ctrl-C");
                break;
            },
            change = failovers.recv() => match change {
                Ok(state) => tracing::info!(active = %state.active_backend, reason = %state.reason, "failover"),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "failover events lagged"),
                Err(RecvError::Closed) => break,
            },
            transition = primary.recv() => log_transition(transition),
            transition = fallback.recv() => log_transition(transition),
        }
    }
    Ok(())
}

fn log_transition(transition: Result<dualstore_storage::StateTransition, RecvError>) {
    match transition {
        Ok(t) => tracing::info!(
            backend = %t.backend,
            from = %t.from,
            to = %t.to,
            error = t.error.as_deref().unwrap_or(""),
            "backend state changed"
        ),
        Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "state events lagged"),
        Err(RecvError::Closed) => {},
    }
}
