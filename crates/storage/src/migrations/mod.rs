//! Versioned schema migrations for both engines.
//!
//! Versions 1..=3 are built in and create the record tables. Deployments
//! can append further versions from a directory of
//! `NNNN_name.pg.sql` / `NNNN_name.sqlite.sql` files. Migration SQL must be
//! idempotent (`IF NOT EXISTS`); the runner does not check this.

#![allow(
    clippy::redundant_pub_crate,
    reason = "migrations module is private, pub(crate) is intentional"
)]

mod runner;
mod v1;
mod v2;
mod v3;

use std::collections::BTreeMap;
use std::path::Path;

use dualstore_core::BackendKind;

use crate::error::MigrationError;

pub use runner::MigrationRunner;

const PG_SUFFIX: &str = ".pg.sql";
const SQLITE_SUFFIX: &str = ".sqlite.sql";

/// One schema version. An engine without SQL for a version records it as
/// applied without running anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub pg_sql: Option<String>,
    pub sqlite_sql: Option<String>,
}

impl Migration {
    pub fn new(version: u32, name: impl Into<String>) -> Self {
        Self { version, name: name.into(), pg_sql: None, sqlite_sql: None }
    }

    #[must_use]
    pub fn with_pg(mut self, sql: impl Into<String>) -> Self {
        self.pg_sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_sqlite(mut self, sql: impl Into<String>) -> Self {
        self.sqlite_sql = Some(sql.into());
        self
    }

    pub fn sql_for(&self, kind: BackendKind) -> Option<&str> {
        match kind {
            BackendKind::DocumentStore => self.pg_sql.as_deref(),
            BackendKind::EmbeddedStore => self.sqlite_sql.as_deref(),
        }
    }
}

/// Ordered migrations with versions contiguous from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        for (expected, migration) in (1u32..).zip(&migrations) {
            if migration.version != expected {
                return Err(MigrationError::InvalidSet(format!(
                    "expected version {expected}, found {} ({})",
                    migration.version, migration.name
                )));
            }
        }
        Ok(Self { migrations })
    }

    /// The record tables and their indexes.
    pub fn builtin() -> Self {
        Self { migrations: builtin_migrations() }
    }

    /// Built-ins followed by every migration found in `dir`.
    pub fn with_directory(dir: &Path) -> Result<Self, MigrationError> {
        let mut migrations = builtin_migrations();
        migrations.extend(load_directory(dir)?);
        Self::new(migrations)
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Migrations above `applied`, ascending.
    pub fn pending(&self, applied: u32) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.version > applied)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, v1::NAME).with_pg(v1::PG_SQL).with_sqlite(v1::SQLITE_SQL),
        Migration::new(2, v2::NAME).with_pg(v2::PG_SQL).with_sqlite(v2::SQLITE_SQL),
        Migration::new(3, v3::NAME).with_pg(v3::PG_SQL).with_sqlite(v3::SQLITE_SQL),
    ]
}

/// Split `0004_add_orders.pg.sql` into `(4, "add_orders", DocumentStore)`.
fn parse_file_name(file_name: &str) -> Option<Result<(u32, &str, BackendKind), MigrationError>> {
    let (stem, kind) = if let Some(stem) = file_name.strip_suffix(PG_SUFFIX) {
        (stem, BackendKind::DocumentStore)
    } else if let Some(stem) = file_name.strip_suffix(SQLITE_SUFFIX) {
        (stem, BackendKind::EmbeddedStore)
    } else {
        return None;
    };
    let parsed = stem
        .split_once('_')
        .and_then(|(version, name)| Some((version.parse::<u32>().ok()?, name)))
        .filter(|(_, name)| !name.is_empty())
        .map(|(version, name)| (version, name, kind))
        .ok_or_else(|| {
            MigrationError::InvalidSet(format!("malformed migration file name {file_name:?}"))
        });
    Some(parsed)
}

/// Read migration files from `dir`, ascending by version. Other files are ignored.
pub fn load_directory(dir: &Path) -> Result<Vec<Migration>, MigrationError> {
    let io_err = |source| MigrationError::Io { path: dir.to_path_buf(), source };
    let mut by_version: BTreeMap<u32, Migration> = BTreeMap::new();

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(parsed) = parse_file_name(file_name) else {
            tracing::debug!(file = %path.display(), "skipping non-migration file");
            continue;
        };
        let (version, name, kind) = parsed?;
        let sql = std::fs::read_to_string(&path)
            .map_err(|source| MigrationError::Io { path: path.clone(), source })?;

        let migration =
            by_version.entry(version).or_insert_with(|| Migration::new(version, name));
        if migration.name != name {
            return Err(MigrationError::InvalidSet(format!(
                "version {version} has two names: {:?} and {name:?}",
                migration.name
            )));
        }
        let slot = match kind {
            BackendKind::DocumentStore => &mut migration.pg_sql,
            BackendKind::EmbeddedStore => &mut migration.sqlite_sql,
        };
        if slot.replace(sql).is_some() {
            return Err(MigrationError::InvalidSet(format!(
                "version {version} has two {kind} files"
            )));
        }
    }

    Ok(by_version.into_values().collect())
}
