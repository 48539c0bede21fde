//! Summarize the acquisition ledger.

use anyhow::{Context, Result};
use landcomp::LedgerIndex;

use super::GlobalArgs;

/// Read the ledger (without creating it) and print latest-status counts.
pub fn run(global: &GlobalArgs, json: bool) -> Result<()> {
    let (_, paths) = global.load()?;
    let index = LedgerIndex::load(&paths.ledger)
        .with_context(|| format!("failed to read ledger {}", paths.ledger.display()))?;
    let summary = index.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Ledger: {}", paths.ledger.display());
    if summary.entries == 0 {
        println!("  (empty)");
        return Ok(());
    }
    println!("  entries:            {}", summary.entries);
    println!("  queries:            {}", summary.keys);
    println!("  success:            {}", summary.success);
    println!("  no_results:         {}", summary.no_results);
    println!("  no_download_button: {}", summary.no_download_button);
    println!("  failed:             {}", summary.failed);
    if !summary.completed_by_location.is_empty() {
        println!();
        println!("Completed by location:");
        for (location, count) in &summary.completed_by_location {
            println!("  {location:<12} {count}");
        }
    }
    Ok(())
}
