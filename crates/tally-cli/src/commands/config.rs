//! `tally config` -- show the effective configuration with provenance.

use anyhow::{Context, Result};

use tally_types::ConfigLoader;

pub fn show() -> Result<()> {
    let effective = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    if effective.source_files.is_empty() {
        println!("# No config files found; using defaults and environment.");
    } else {
        for path in &effective.source_files {
            println!("# Loaded: {}", path.display());
        }
    }
    println!();
    println!(
        "{}",
        effective
            .config
            .to_toml()
            .context("failed to render configuration")?
    );

    let mut keys: Vec<_> = effective.sources.iter().collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    println!("# Sources:");
    for (key, source) in keys {
        println!("#   {key:<28} {source}");
    }
    Ok(())
}
