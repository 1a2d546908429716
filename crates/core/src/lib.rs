//! Core types and configuration for dualstore
//!
//! This crate contains domain types shared across all other crates: backend
//! identity and connection states, the generic domain record, health and
//! failover bookkeeping, backup schedules and the persistence configuration.

mod backend;
mod config;
mod constants;
mod env_config;
mod error;
mod health;
mod record;
mod schedule;

pub use backend::*;
pub use config::*;
pub use constants::*;
pub use env_config::*;
pub use error::*;
pub use health::*;
pub use record::*;
pub use schedule::*;
