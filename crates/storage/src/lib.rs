//! Storage layer for dualstore
//!
//! Two engines behind one [`BackendDriver`] trait: a PostgreSQL document
//! store and an embedded SQLite store. [`BackendHandle`] adds the connection
//! state machine and timeouts; [`MigrationRunner`] versions their schemas.

mod driver;
mod error;
mod handle;
mod migrations;
mod pg_store;
mod sqlite_async;
mod sqlite_store;
#[cfg(test)]
mod tests;

pub use driver::{BackendDriver, Operation, RawResult};
pub use error::{BackendError, ConnectError, MigrationError, PingError};
pub use handle::{BackendHandle, HandleTimeouts, StateTransition};
pub use migrations::{load_directory, Migration, MigrationRunner, MigrationSet};
pub use pg_store::PgDocumentStore;
pub use sqlite_store::SqliteStore;
