//! Configuration management for the Dynamo simulator
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (DYNAMO_* prefix, highest precedence)
//! 2. dynamo.local.toml (gitignored, local overrides)
//! 3. dynamo.toml (project config)
//! 4. ~/.config/dynamo/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Seed for every random choice the simulation makes.
    pub seed: u64,
    pub replication: ReplicationConfig,
    pub ring: RingConfig,
    pub store: StoreConfig,
    pub timers: TimerConfig,
    pub run: RunConfig,
}

/// Quorum parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replicas per key.
    pub n: usize,
    /// Replies needed to complete a read.
    pub r: usize,
    /// Acks needed to complete a write.
    pub w: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { n: 3, r: 2, w: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Virtual points per node.
    pub repeats: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { repeats: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Merkle tree depth of each node's local store.
    pub depth: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { depth: 12 }
    }
}

/// Timer priorities. Higher fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub default_priority: u32,
    /// Request timeouts armed by nodes.
    pub node_priority: u32,
    /// Request timeouts armed by clients.
    pub client_priority: u32,
    /// A node's recurring failed-peer probe.
    pub probe_priority: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_priority: 10,
            node_priority: 20,
            client_priority: 17,
            probe_priority: 15,
        }
    }
}

/// Default budgets for a single `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_messages: usize,
    pub max_timers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_messages: 32_768,
            max_timers: 32_768,
        }
    }
}

impl DynamoConfig {
    /// Load configuration from the current directory
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a single TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_replication(mut self, n: usize, r: usize, w: usize) -> Self {
        self.replication = ReplicationConfig { n, r, w };
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ReplicationConfig { n, r, w } = self.replication;
        if n == 0 {
            return Err(ConfigError::ValidationError(
                "replication.n must be at least 1".to_string(),
            ));
        }
        if r == 0 || r > n {
            return Err(ConfigError::ValidationError(format!(
                "replication.r must be in 1..={n}, got {r}"
            )));
        }
        if w == 0 || w > n {
            return Err(ConfigError::ValidationError(format!(
                "replication.w must be in 1..={n}, got {w}"
            )));
        }
        if self.ring.repeats == 0 {
            return Err(ConfigError::ValidationError(
                "ring.repeats must be at least 1".to_string(),
            ));
        }
        if !(1..=20).contains(&self.store.depth) {
            return Err(ConfigError::ValidationError(format!(
                "store.depth must be in 1..=20, got {}",
                self.store.depth
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DynamoConfig::default();
        assert_eq!(config.replication, ReplicationConfig { n: 3, r: 2, w: 2 });
        assert_eq!(config.ring.repeats, 10);
        assert_eq!(config.store.depth, 12);
        assert_eq!(config.timers.node_priority, 20);
        assert_eq!(config.timers.client_priority, 17);
        assert_eq!(config.timers.probe_priority, 15);
        assert_eq!(config.run.max_messages, 32_768);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DynamoConfig::from_toml_str(
            r"
seed = 7

[replication]
n = 5
w = 3
",
        )
        .expect("valid config");
        assert_eq!(config.seed, 7);
        assert_eq!(config.replication, ReplicationConfig { n: 5, r: 2, w: 3 });
        assert_eq!(config.timers, TimerConfig::default());
    }

    #[test]
    fn test_quorum_validation() {
        let err = DynamoConfig::default()
            .with_replication(3, 4, 2)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("replication.r"));
        assert!(DynamoConfig::default().with_replication(0, 0, 0).validate().is_err());
        assert!(DynamoConfig::default().with_replication(3, 2, 0).validate().is_err());
        assert!(DynamoConfig::from_toml_str("[store]\ndepth = 0\n").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("dynamo.toml");
        let config = DynamoConfig::default().with_seed(99);
        config.save_to_file(&path).expect("save");
        assert_eq!(DynamoConfig::load_from_file(&path).expect("load"), config);
    }
}
