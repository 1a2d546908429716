//! Service layer for dualstore
//!
//! Keeps a primary document store and an embedded fallback behind one
//! [`Repository`], probing both and switching between them with hysteresis.
//! [`Persistence`] owns the lifecycle.

#![allow(missing_docs, reason = "Internal crate with self-explanatory API")]
#![allow(clippy::missing_errors_doc, reason = "Errors are self-explanatory from Result types")]
#![allow(missing_debug_implementations, reason = "Internal types")]
#![allow(clippy::missing_docs_in_private_items, reason = "Internal crate")]
#![allow(clippy::implicit_return, reason = "Implicit return is idiomatic Rust")]
#![allow(clippy::question_mark_used, reason = "? operator is idiomatic Rust")]
#![allow(clippy::cognitive_complexity, reason = "Complex async flows are inherent")]
#![allow(clippy::min_ident_chars, reason = "Short error vars are idiomatic")]

mod backup;
mod error;
mod failover;
mod gate;
mod health;
mod persistence;
mod repository;
#[cfg(test)]
mod tests;

pub use backup::BackupScheduler;
pub use error::{BackupError, InitError, OperatorError, RepoError};
pub use failover::FailoverCoordinator;
pub use health::{HealthMonitor, HealthObserver};
pub use persistence::{
    BackendReport, BackendStatus, InitReport, OverallStatus, Persistence, StatusReport,
};
pub use repository::{Repository, TypedCollection, Versioned};
