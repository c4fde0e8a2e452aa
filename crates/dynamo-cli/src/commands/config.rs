//! Configuration management commands.

use std::path::Path;

use anyhow::{Context, Result};
use dynamo_config::{DynamoConfig, Paths};

/// Show the configuration the `run` command would use.
pub fn show(format: &str) -> Result<()> {
    let config = DynamoConfig::load().context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        other => anyhow::bail!("Unknown format '{other}' (expected toml or json)"),
    }
    Ok(())
}

/// Write the defaults as a starting `dynamo.toml`.
pub fn init(dir: &Path, force: bool) -> Result<()> {
    let path = Paths::project_config_file(dir);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    DynamoConfig::default()
        .save_to_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
