pub mod audit;
pub mod config;
pub mod dispatch;
pub mod list;

use anyhow::{Context, Result};

use tally_types::{ConfigLoader, TallyConfig};

/// Load the merged configuration (defaults, user file, workspace file, env).
pub fn load_config() -> Result<TallyConfig> {
    let effective = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    Ok(effective.config)
}
