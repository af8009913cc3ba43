use anyhow::{Context, Result};

use tally_ledger::{AuditRecord, AuditStore};

use crate::commands::load_config;

/// Run `tally audit --last N [--actor A]`.
pub fn show(last: usize, actor: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let store = AuditStore::open(&config.audit.db_path).context("failed to open audit store")?;

    let records = match actor {
        Some(actor) => store.query_actor(actor, last),
        None => store.query_last(last),
    }
    .context("failed to query audit records")?;

    if records.is_empty() {
        println!("No audit records found.");
        return Ok(());
    }
    print_table(&records);
    Ok(())
}

/// Run `tally verify`.
///
/// Exits with status 1 when the hash chain is broken.
pub fn verify() -> Result<()> {
    let config = load_config()?;
    let store = AuditStore::open(&config.audit.db_path).context("failed to open audit store")?;

    let report = store
        .verify_integrity()
        .context("failed to verify ledger integrity")?;

    println!("Integrity Report:");
    println!("  Total entries: {}", report.total_entries);
    println!("  Valid:         {}", if report.valid { "YES" } else { "NO" });
    if let Some(idx) = report.first_invalid_entry {
        println!("  First invalid: entry #{idx}");
    }
    println!("  Message:       {}", report.message);

    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn print_table(records: &[AuditRecord]) {
    println!(
        "{:<20}  {:<6}  {:<12}  {:<12}  {:<10}  DETAIL",
        "TIMESTAMP", "STATUS", "SCOPE", "ACTOR", "COMMAND"
    );
    println!("{}", "-".repeat(100));

    for record in records {
        let timestamp = record.timestamp.format("%Y-%m-%d %H:%M:%S");
        let detail = record.detail.as_deref().unwrap_or("");
        let detail = if detail.chars().count() > 40 {
            format!("{}...", detail.chars().take(37).collect::<String>())
        } else {
            detail.to_string()
        };
        println!(
            "{:<20}  {:<6}  {:<12}  {:<12}  {:<10}  {}",
            timestamp, record.status, record.scope_id, record.actor_id, record.command, detail
        );
    }
}
