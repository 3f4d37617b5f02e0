//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Row lock configuration
    pub locking: LockingConfig,

    /// Balance projection configuration
    pub projection: ProjectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wagerbook"),
            rocksdb: RocksDBConfig::default(),
            locking: LockingConfig::default(),
            projection: ProjectionConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Row lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// How long a unit of work waits for a row lock before failing with a conflict (ms)
    pub lock_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
        }
    }
}

impl LockingConfig {
    /// Lock timeout as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Balance projection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Refresh interval of the cached balance view (ms)
    pub refresh_interval_ms: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5_000,
        }
    }
}

impl ProjectionConfig {
    /// Refresh interval as a duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `WAGERBOOK_*` environment variables on top of this config
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("WAGERBOOK_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ms) = std::env::var("WAGERBOOK_LOCK_TIMEOUT_MS") {
            self.locking.lock_timeout_ms = parse_env("WAGERBOOK_LOCK_TIMEOUT_MS", &ms)?;
        }

        if let Ok(ms) = std::env::var("WAGERBOOK_PROJECTION_REFRESH_MS") {
            self.projection.refresh_interval_ms =
                parse_env("WAGERBOOK_PROJECTION_REFRESH_MS", &ms)?;
        }

        Ok(())
    }

    /// Reject values the store cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("data_dir must not be empty".to_string()));
        }
        if self.locking.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "locking.lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.projection.refresh_interval_ms == 0 {
            return Err(crate::Error::Config(
                "projection.refresh_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} has an invalid value: {}", name, value)))
}
