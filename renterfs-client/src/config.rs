//! Client configuration
//!
//! Supports loading from TOML files and `RENTERFS_*` environment variables.
//!
//! ```toml
//! [host_set]
//! connect_timeout_ms = 5000
//! op_timeout_ms = 30000
//! max_retries = 2
//!
//! [store]
//! chunk_size = 4194304
//! ```

use renterfs_core::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a config file for the library surface
pub const CONFIG_PATH_ENV: &str = "RENTERFS_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for renterfs_core::RenterError {
    fn from(err: ConfigError) -> Self {
        renterfs_core::RenterError::Configuration(err.to_string())
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub host_set: HostSetConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Configuration used by the library surface: the file named by
    /// `RENTERFS_CONFIG` if set, then environment overrides
    pub fn from_env() -> Self {
        let config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_or_default(path),
            Err(_) => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host_set.validate()?;
        self.store.validate()
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable override");
                    None
                }
            }
        }

        let hs = &mut self.host_set;
        if let Some(v) = parsed(&lookup, "RENTERFS_CONNECT_TIMEOUT_MS") {
            hs.connect_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_OP_TIMEOUT_MS") {
            hs.op_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_MAX_RETRIES") {
            hs.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_RETRY_DELAY_MS") {
            hs.retry_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_FAILURE_THRESHOLD") {
            hs.failure_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_RECOVERY_TIMEOUT_MS") {
            hs.recovery_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_STRAGGLER_GRACE_MS") {
            hs.straggler_grace_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RENTERFS_CHUNK_SIZE") {
            self.store.chunk_size = v;
        }
        self
    }
}

/// Host set timing and health settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSetConfig {
    /// TCP connect timeout for shard and host connections
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upper bound on one fragment operation against one host
    #[serde(default = "default_op_timeout")]
    pub op_timeout_ms: u64,

    /// Retries per fragment operation after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay (doubles with each retry)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Consecutive failures before a host is taken out of rotation
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// How long a host stays out of rotation before it is probed again
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,

    /// How long a write waits for slow uploads once redundancy is met
    #[serde(default = "default_straggler_grace")]
    pub straggler_grace_ms: u64,
}

impl Default for HostSetConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            op_timeout_ms: default_op_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout(),
            straggler_grace_ms: default_straggler_grace(),
        }
    }
}

impl HostSetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn straggler_grace(&self) -> Duration {
        Duration::from_millis(self.straggler_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 || self.op_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_op_timeout() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    100
}

fn default_failure_threshold() -> u64 {
    3
}

fn default_recovery_timeout() -> u64 {
    30_000
}

fn default_straggler_grace() -> u64 {
    2_000
}

/// File store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Plaintext bytes per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::ValidationError(format!(
                "chunk_size must be between {} and {} bytes, got {}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        Ok(())
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.store.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.host_set.max_retries, 2);
        assert_eq!(config.host_set.op_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [host_set]
            op_timeout_ms = 500
            max_retries = 0

            [store]
            chunk_size = 65536
        "#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.host_set.op_timeout_ms, 500);
        assert_eq!(config.host_set.max_retries, 0);
        assert_eq!(config.host_set.connect_timeout_ms, 5_000);
        assert_eq!(config.store.chunk_size, 65536);
    }

    #[test]
    fn test_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renterfs.toml");

        std::fs::write(&path, "[store]\nchunk_size = 16\n").unwrap();
        assert!(matches!(
            ClientConfig::from_file(&path),
            Err(ConfigError::ValidationError(_))
        ));

        std::fs::write(&path, "[host_set]\nmax_retries = 5\n").unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap().host_set.max_retries, 5);

        let missing = ClientConfig::load_or_default(dir.path().join("nope.toml"));
        assert_eq!(missing.host_set.max_retries, 2);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RENTERFS_OP_TIMEOUT_MS", "1500"),
            ("RENTERFS_CHUNK_SIZE", "8192"),
            ("RENTERFS_MAX_RETRIES", "not-a-number"),
            ("RENTERFS_RECOVERY_TIMEOUT_MS", "45000"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.host_set.op_timeout_ms, 1500);
        assert_eq!(config.store.chunk_size, 8192);
        assert_eq!(config.host_set.max_retries, 2);
        assert_eq!(config.host_set.recovery_timeout(), Duration::from_secs(45));
    }
}
