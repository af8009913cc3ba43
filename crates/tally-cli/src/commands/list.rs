//! `tally commands` -- print the command registry.

use anyhow::{Context, Result};

use tally_commands::CommandRegistry;
use tally_types::Role;

pub fn run(role: Option<Role>) -> Result<()> {
    let registry = CommandRegistry::builtin().context("invalid built-in command table")?;

    if let Some(role) = role {
        println!("{}", registry.help_text(role));
        return Ok(());
    }

    println!("{:<10}  {:<8}  {:<30}  DESCRIPTION", "COMMAND", "ROLE", "USAGE");
    println!("{}", "-".repeat(90));
    for meta in registry.all() {
        println!(
            "{:<10}  {:<8}  {:<30}  {}",
            meta.name,
            meta.permission.as_str(),
            meta.usage(),
            meta.description
        );
        if !meta.aliases.is_empty() {
            println!("{:<10}  aliases: {}", "", meta.aliases.join(", "));
        }
    }
    Ok(())
}
