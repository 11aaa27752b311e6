//! Configuration management for VitalChain.
//!
//! Configuration is read from a TOML file. Every section has defaults, so a
//! partial file (or no file at all) yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[cfg(feature = "toml")]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Which durable mirror backend the ledger reconciles against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorBackend {
    /// SQLite database file at `storage.mirror_path`
    Sqlite,
    /// Process-local store; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Location of the ledger encryption key
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default = "default_mirror_backend")]
    pub mirror_backend: MirrorBackend,
    #[serde(default = "default_mirror_path")]
    pub mirror_path: PathBuf,
    /// SQLite busy timeout, bounds how long a mirror call may block
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Interval between simulated readings in `run` mode
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Readings generated on first start when the mirror is empty
    #[serde(default = "default_seed_readings")]
    pub seed_readings: usize,
    /// Fixed simulator seed; random when absent
    #[serde(default)]
    pub simulator_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Top-level ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_key_path() -> PathBuf {
    PathBuf::from("datastore/encryption_key.key")
}

fn default_mirror_backend() -> MirrorBackend {
    MirrorBackend::Sqlite
}

fn default_mirror_path() -> PathBuf {
    PathBuf::from("datastore/mirror.db")
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    2_000
}

fn default_interval() -> u64 {
    5_000
}

fn default_seed_readings() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
            mirror_backend: default_mirror_backend(),
            mirror_path: default_mirror_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            seed_readings: default_seed_readings(),
            simulator_seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LedgerConfig {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: LedgerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    ///
    /// Parent directories of the key and mirror paths are created so the
    /// first run can generate its key and open the mirror.
    #[cfg(feature = "toml")]
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let config = Self::default();
                config.validate()?;
                config
            }
        };

        for file in [&config.storage.key_path, &config.storage.mirror_path] {
            if let Some(parent) = file.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.key_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.key_path cannot be empty".to_string(),
            ));
        }
        if self.storage.mirror_backend == MirrorBackend::Sqlite
            && self.storage.mirror_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "storage.mirror_path is required for the sqlite backend".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Validation(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.ingest.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "ingest.interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.mirror_backend, MirrorBackend::Sqlite);
        assert_eq!(config.ingest.seed_readings, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [storage]
            mirror_backend = "memory"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.mirror_backend, MirrorBackend::Memory);
        assert_eq!(config.storage.key_path, default_key_path());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped: LedgerConfig =
            toml::from_str(include_str!("../../../config/vitalchain.toml")).unwrap();
        let defaults = LedgerConfig::default();

        assert!(shipped.validate().is_ok());
        assert_eq!(shipped.storage.key_path, defaults.storage.key_path);
        assert_eq!(shipped.storage.busy_timeout_ms, defaults.storage.busy_timeout_ms);
        assert_eq!(shipped.retry.max_delay_ms, defaults.retry.max_delay_ms);
        assert_eq!(shipped.ingest.interval_ms, defaults.ingest.interval_ms);
        assert_eq!(shipped.ingest.simulator_seed, None);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = LedgerConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_inverted_delays() {
        let mut config = LedgerConfig::default();
        config.retry.initial_delay_ms = 10_000;
        config.retry.max_delay_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("vitalchain_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vitalchain.toml");

        let mut config = LedgerConfig::default();
        config.storage.key_path = dir.join("keys/ledger.key");
        config.storage.mirror_path = dir.join("mirror/mirror.db");
        config.ingest.simulator_seed = Some(42);
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.ingest.simulator_seed, Some(42));
        assert!(dir.join("keys").is_dir());
        assert!(dir.join("mirror").is_dir());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_from_file_missing() {
        let missing = std::env::temp_dir().join(format!("missing_{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(
            LedgerConfig::from_file(missing),
            Err(ConfigError::Read(_))
        ));
    }
}
