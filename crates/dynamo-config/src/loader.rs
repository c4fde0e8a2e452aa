//! Configuration loader with multi-source merging

use crate::{DynamoConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "DYNAMO".to_string(),
            include_user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "DYNAMO")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/dynamo/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence.
    ///
    /// Environment overrides use `__` between section and field, e.g.
    /// `DYNAMO_RUN__MAX_MESSAGES=100` or `DYNAMO_SEED=7`.
    pub fn load(self) -> Result<DynamoConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = DynamoConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config
        if self.include_user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Project config, then 4. local overrides
        for file in [
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ] {
            if file.exists() {
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 5. Environment variables
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build().context("Failed to build configuration")?;
        let config: DynamoConfig = merged
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate().context("Configuration failed validation")?;
        Ok(config)
    }

    /// Load configuration or fall back to defaults
    pub fn load_or_default(self) -> DynamoConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix("DYNAMO_LOADER_TEST")
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");
        assert_eq!(config, DynamoConfig::default());
    }

    #[test]
    fn test_local_overrides_project() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(
            project_dir.join("dynamo.toml"),
            "seed = 3\n\n[replication]\nn = 5\nr = 3\nw = 3\n",
        )
        .expect("Failed to write project config");
        fs::write(project_dir.join("dynamo.local.toml"), "[replication]\nw = 4\n")
            .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");
        assert_eq!(config.seed, 3);
        assert_eq!(config.replication.n, 5);
        assert_eq!(config.replication.r, 3);
        assert_eq!(config.replication.w, 4);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("dynamo.toml"), "[replication]\nr = 9\n")
            .expect("Failed to write project config");
        assert!(loader(temp_dir.path()).load().is_err());
        assert_eq!(
            loader(temp_dir.path()).load_or_default(),
            DynamoConfig::default()
        );
    }
}
