//! Tracker configuration
//!
//! Loaded from a TOML file; every field has a default so a partial (or empty)
//! file is valid:
//!
//! ```toml
//! [database]
//! path = "tracker.db"
//! read_pool_size = 4
//!
//! [events]
//! queue_capacity = 256
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub database: DatabaseConfig,
    pub events: EventsConfig,
}

/// `[database]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Capacity of the read connection pool
    pub read_pool_size: usize,
    /// Capacity of the write connection pool (1 = single writer)
    pub write_pool_size: usize,
    /// Per-connection busy timeout
    pub busy_timeout_ms: u64,
    /// Prepared statements kept per connection
    pub statement_cache_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tracker.db"),
            read_pool_size: 4,
            write_pool_size: 1,
            busy_timeout_ms: 5000,
            statement_cache_capacity: 64,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// `[events]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum number of queued event batches before `emit` blocks
    pub queue_capacity: usize,
    /// Sleep between polls in `wait_complete`
    pub poll_interval_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            poll_interval_ms: 1,
        }
    }
}

impl EventsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl TrackerConfig {
    /// Default configuration with the database at `path`
    pub fn with_database_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.database.path = path.into();
        config
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse tracker config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize tracker config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Reject values the store and sink cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.database.read_pool_size == 0 {
            anyhow::bail!("database.read_pool_size must be at least 1");
        }
        if self.database.write_pool_size == 0 {
            anyhow::bail!("database.write_pool_size must be at least 1");
        }
        if self.events.queue_capacity == 0 {
            anyhow::bail!("events.queue_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TrackerConfig::from_toml_str("").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.database.write_pool_size, 1);
    }

    #[test]
    fn test_partial_document() {
        let config = TrackerConfig::from_toml_str(
            "[database]\nread_pool_size = 8\n\n[events]\nqueue_capacity = 16\n",
        )
        .unwrap();
        assert_eq!(config.database.read_pool_size, 8);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.events.queue_capacity, 16);
    }

    #[test]
    fn test_rejects_zero_pool() {
        let err = TrackerConfig::from_toml_str("[database]\nread_pool_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("read_pool_size"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("tracker.toml");
        let config = TrackerConfig::with_database_path(dir.path().join("db.sqlite"));
        config.save(&file).unwrap();
        assert_eq!(TrackerConfig::load(&file).unwrap(), config);
    }
}
