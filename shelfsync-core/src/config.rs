//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the transfer engine, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum simultaneous transfers (the limiter bound `K`)
    pub max_concurrent_transfers: usize,

    /// Retries for transient remote failures before a job fails
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    pub backoff_max_ms: u64,

    /// Deadline for resolving one book's metadata
    pub metadata_timeout_ms: u64,

    /// Chunk size used by the object remote store (bytes)
    pub chunk_size: usize,

    /// Capacity of the transfer event broadcast channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 3,
            max_retries: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            metadata_timeout_ms: 10_000,
            chunk_size: 256 * 1024,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(data) => Self::from_toml_str(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_transfers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid {
                field: "backoff_max_ms",
                reason: format!("must not be below backoff_base_ms ({})", self.backoff_base_ms),
            });
        }
        Ok(())
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
