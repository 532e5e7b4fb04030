//! Layered configuration: defaults, an optional TOML file, then `ROLLUPDB_*`
//! environment variables (`__` separates nested keys, e.g.
//! `ROLLUPDB_TABLES__INBOUND_TOTALS__RETENTION_SECS`).
//!
//! ```toml
//! data_dir = "/var/lib/rollupdb"
//! wal_sync = true
//!
//! [tables.inbound_totals]
//! sql = "SELECT requests FROM inbound WHERE ok GROUP BY host, period('1m')"
//! retention_secs = 86400
//! ```

use crate::core::DbConfig;
use crate::error::DbError;
use crate::table::TableOptions;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "ROLLUPDB";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TableFileConfig {
    pub sql: String,
    pub retention_secs: Option<u64>,
}

/// Config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, Deserialize)]
pub struct DbFileConfig {
    pub data_dir: Option<String>,
    pub wal_sync: Option<bool>,
    pub reader_poll_interval_ms: Option<u64>,
    /// 0 disables throughput events.
    pub throughput_report_interval_secs: Option<u64>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableFileConfig>,
}

/// Result of [`load_config`]: database settings plus declared tables.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub db: DbConfig,
    pub tables: Vec<TableOptions>,
}

/// Loads and merges configuration.
///
/// # Errors
/// Returns `ConfigError` if `path` is given but missing, or if the merged sources do
/// not deserialize.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, DbError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(DbError::ConfigError(format!("config file not found: {}", path.display())));
        }
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let partial: DbFileConfig = builder.build()?.try_deserialize()?;
    let mut db = DbConfig::default();
    merge_into_db_config(&mut db, &partial);
    Ok(LoadedConfig {
        db,
        tables: table_options(&partial),
    })
}

/// Merge file/env partial config onto `DbConfig`. Only overwrites fields that are `Some`.
pub fn merge_into_db_config(base: &mut DbConfig, partial: &DbFileConfig) {
    if let Some(s) = &partial.data_dir {
        base.data_dir = PathBuf::from(s);
    }
    if let Some(b) = partial.wal_sync {
        base.wal_sync = b;
    }
    if let Some(ms) = partial.reader_poll_interval_ms {
        base.reader_poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(secs) = partial.throughput_report_interval_secs {
        base.throughput_report_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }
}

fn table_options(partial: &DbFileConfig) -> Vec<TableOptions> {
    partial
        .tables
        .iter()
        .map(|(name, t)| TableOptions {
            name: name.clone(),
            sql: t.sql.clone(),
            retention: t.retention_secs.map(Duration::from_secs),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_only_overrides_present_fields() {
        let mut base = DbConfig::default();
        let partial = DbFileConfig {
            wal_sync: Some(false),
            throughput_report_interval_secs: Some(0),
            ..Default::default()
        };
        merge_into_db_config(&mut base, &partial);
        assert!(!base.wal_sync);
        assert_eq!(base.throughput_report_interval, None);
        assert_eq!(base.data_dir, PathBuf::from("./data"));
        assert_eq!(base.reader_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, DbError::ConfigError(_)));
    }
}
