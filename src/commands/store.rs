//! Store maintenance commands

use anyhow::Result;
use colored::Colorize;
use request_details::config::ObservabilityConfig;
use request_details::observability::{run_retention_now, RetentionPolicy};

use super::open_store;

/// List providers that appear in stored request details
pub async fn providers(config: &ObservabilityConfig) -> Result<()> {
    let db = open_store(config).await?;
    let providers = db.distinct_providers().await?;

    if providers.is_empty() {
        println!("{}", "No providers recorded yet".yellow());
        return Ok(());
    }

    println!("{}", "Providers".bold().underline());
    for provider in providers {
        println!("  {}", provider.cyan());
    }

    Ok(())
}

/// Trim the store down to `max_records` now
pub async fn prune(config: &ObservabilityConfig) -> Result<()> {
    let db = open_store(config).await?;
    let policy = RetentionPolicy::new(config.max_records);

    let before = db.count().await?;
    let deleted = run_retention_now(&db, policy).await?;

    println!("{}", "Retention Results:".green().bold());
    println!("{:<30} {:>15}", "  Rows Before:", before);
    println!("{:<30} {:>15}", "  Rows Deleted:", deleted);
    println!("{:<30} {:>15}", "  Max Records:", policy.max_records());

    if deleted == 0 {
        println!();
        println!("{}", "Nothing to delete (store within retention bound)".dimmed());
    }

    Ok(())
}
