//! Shared constants for dualstore.
//!
//! Centralizes defaults that are referenced from configuration, storage and
//! service crates.

/// Default bound on establishing a backend connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default bound on a single liveness probe. Independent of the connect timeout.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 2_000;

/// Default bound on a single repository operation.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Bound on bulk work: one migration step, a full export for a backup.
pub const DEFAULT_BULK_TIMEOUT_MS: u64 = 60_000;

/// Default health probe interval.
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 30_000;

/// Consecutive failed probes of the primary before failing over.
pub const DEFAULT_FAILOVER_THRESHOLD: u32 = 3;

/// Consecutive successful probes of the primary before failing back.
pub const DEFAULT_FAILBACK_THRESHOLD: u32 = 2;

/// Number of snapshots kept in the rolling diagnostic health log.
pub const DEFAULT_HEALTH_LOG_CAPACITY: usize = 256;

/// Default backup cadence.
pub const DEFAULT_BACKUP_SCHEDULE: &str = "daily at 02:00";

/// Days a backup artifact is kept before the retention sweep removes it.
pub const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 7;

/// Upper bound on `backup.retentionDays` (one hundred years).
pub const MAX_BACKUP_RETENTION_DAYS: u32 = 36_500;

/// PostgreSQL connection pool: maximum connections.
pub const PG_POOL_MAX_CONNECTIONS: u32 = 20;

/// PostgreSQL connection pool: idle timeout in seconds.
pub const PG_POOL_IDLE_TIMEOUT_SECS: u64 = 300;

/// SQLite connection pool size.
pub const SQLITE_POOL_SIZE: u32 = 8;

/// Maximum number of results for any scan (DoS protection).
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Default number of results when limit is not specified by the caller.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Upper bound on repository calls admitted concurrently. Shutdown drains
/// by acquiring all of them.
pub const MAX_IN_FLIGHT_OPERATIONS: u32 = 1024;

/// File name of the backup manifest inside the backup directory.
pub const BACKUP_MANIFEST_FILE: &str = "manifest.json";
