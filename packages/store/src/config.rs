use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Cache directory configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Root directory holding container files and the usage ledger.
    /// Default: "cache".
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Whether to enable filesystem-level compression of the cache
    /// directory on supported volumes. Default: true.
    #[serde(default = "default_volume_compression")]
    pub volume_compression: bool,
}

fn default_cache_dir() -> PathBuf {
    "cache".into()
}
fn default_volume_compression() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            volume_compression: default_volume_compression(),
        }
    }
}

/// Usage ledger configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Days of per-day usage buckets to retain. Default: 30.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Minimum seconds between retention cleanup runs. Default: 21600 (6h).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Events per commit batch. Default: 50.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between forced flushes of a partial batch. Default: 2.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    30
}
fn default_cleanup_interval_secs() -> u64 {
    6 * 60 * 60
}
fn default_batch_size() -> usize {
    50
}
fn default_flush_interval_secs() -> u64 {
    2
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// Store application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl StoreConfig {
    /// Location of the usage ledger database inside the cache directory.
    pub fn ledger_db_path(&self) -> PathBuf {
        self.cache.dir.join("usage.db")
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("ARTIFACT_CONFIG").unwrap_or_else(|_| "config/store".to_string());

        let s = Config::builder()
            .set_default("cache.dir", "cache")?
            .set_default("cache.volume_compression", true)?
            .set_default("ledger.retention_days", 30_i64)?
            .set_default("ledger.cleanup_interval_secs", 21600_i64)?
            .set_default("ledger.batch_size", 50_i64)?
            .set_default("ledger.flush_interval_secs", 2_i64)?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("ARTIFACT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_serde_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.cache.dir, PathBuf::from("cache"));
        assert_eq!(config.ledger_db_path(), PathBuf::from("cache/usage.db"));
        assert!(config.cache.volume_compression);
        assert_eq!(config.ledger.retention_days, 30);
        assert_eq!(config.ledger.cleanup_interval_secs, 21600);
        assert_eq!(config.ledger.batch_size, 50);
        assert_eq!(config.ledger.flush_interval_secs, 2);
    }

    #[test]
    fn empty_sources_deserialize_to_defaults() {
        let config: StoreConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap_or_default();
        assert_eq!(config.ledger.batch_size, 50);
    }
}
