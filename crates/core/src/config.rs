//! Persistence configuration.
//!
//! Loaded from an optional TOML file (camelCase keys mirroring
//! `primary.connectionString`, `health.intervalMs`, ...) and then overridden
//! from `DUALSTORE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_BACKUP_SCHEDULE, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_FAILBACK_THRESHOLD, DEFAULT_FAILOVER_THRESHOLD, DEFAULT_HEALTH_INTERVAL_MS,
    DEFAULT_HEALTH_LOG_CAPACITY, DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_PING_TIMEOUT_MS,
    MAX_BACKUP_RETENTION_DAYS,
};
use crate::env_config::{env_parse_with_default, env_string};
use crate::error::ConfigError;
use crate::schedule::BackupSchedule;

fn data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("dualstore")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimaryConfig {
    /// PostgreSQL URL. `None` leaves the primary unconfigured.
    pub connection_string: Option<String>,
    pub connect_timeout_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackConfig {
    pub storage_path: PathBuf,
    pub connect_timeout_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            storage_path: data_dir().join("fallback.db"),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub failover_threshold: u32,
    pub failback_threshold: u32,
    pub log_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            failover_threshold: DEFAULT_FAILOVER_THRESHOLD,
            failback_threshold: DEFAULT_FAILBACK_THRESHOLD,
            log_capacity: DEFAULT_HEALTH_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupConfig {
    pub cron: BackupSchedule,
    pub retention_days: u32,
    pub directory: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_BACKUP_SCHEDULE
                .parse()
                .unwrap_or(BackupSchedule::Every(chrono::Duration::days(1))),
            retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
            directory: data_dir().join("backups"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationsConfig {
    /// Directory of `NNNN_name.{pg,sqlite}.sql` files applied after the built-ins.
    pub source_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceConfig {
    pub primary: PrimaryConfig,
    pub fallback: FallbackConfig,
    pub operation_timeout_ms: u64,
    pub health: HealthConfig,
    pub backup: BackupConfig,
    pub migrations: MigrationsConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig::default(),
            fallback: FallbackConfig::default(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            health: HealthConfig::default(),
            backup: BackupConfig::default(),
            migrations: MigrationsConfig::default(),
        }
    }
}

impl PersistenceConfig {
    /// Load from `path` (if given), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("DUALSTORE_PRIMARY_URL") {
            self.primary.connection_string = Some(url);
        }
        self.primary.connect_timeout_ms = env_parse_with_default(
            "DUALSTORE_PRIMARY_CONNECT_TIMEOUT_MS",
            self.primary.connect_timeout_ms,
        );
        if let Some(path) = env_string("DUALSTORE_FALLBACK_PATH") {
            self.fallback.storage_path = PathBuf::from(path);
        }
        self.operation_timeout_ms =
            env_parse_with_default("DUALSTORE_OPERATION_TIMEOUT_MS", self.operation_timeout_ms);
        self.health.interval_ms =
            env_parse_with_default("DUALSTORE_HEALTH_INTERVAL_MS", self.health.interval_ms);
        self.health.failover_threshold =
            env_parse_with_default("DUALSTORE_FAILOVER_THRESHOLD", self.health.failover_threshold);
        self.health.failback_threshold =
            env_parse_with_default("DUALSTORE_FAILBACK_THRESHOLD", self.health.failback_threshold);
        if let Some(raw) = env_string("DUALSTORE_BACKUP_CRON") {
            match raw.parse() {
                Ok(schedule) => self.backup.cron = schedule,
                Err(e) => tracing::warn!(error = %e, "ignoring DUALSTORE_BACKUP_CRON"),
            }
        }
        self.backup.retention_days =
            env_parse_with_default("DUALSTORE_BACKUP_RETENTION_DAYS", self.backup.retention_days);
        if let Some(dir) = env_string("DUALSTORE_BACKUP_DIR") {
            self.backup.directory = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("DUALSTORE_MIGRATIONS_DIR") {
            self.migrations.source_directory = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.primary.connect_timeout_ms == 0, "primary.connectTimeoutMs must be > 0"),
            (self.primary.ping_timeout_ms == 0, "primary.pingTimeoutMs must be > 0"),
            (self.fallback.connect_timeout_ms == 0, "fallback.connectTimeoutMs must be > 0"),
            (self.fallback.ping_timeout_ms == 0, "fallback.pingTimeoutMs must be > 0"),
            (self.operation_timeout_ms == 0, "operationTimeoutMs must be > 0"),
            (self.health.interval_ms == 0, "health.intervalMs must be > 0"),
            (self.health.failover_threshold == 0, "health.failoverThreshold must be >= 1"),
            (self.health.failback_threshold == 0, "health.failbackThreshold must be >= 1"),
            (self.backup.retention_days == 0, "backup.retentionDays must be >= 1"),
            (
                self.backup.retention_days > MAX_BACKUP_RETENTION_DAYS,
                "backup.retentionDays must be <= 36500",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_owned())),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health.interval_ms)
    }
}
