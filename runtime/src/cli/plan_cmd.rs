//! Show the partitioned query plan against the ledger.

use anyhow::{Context, Result};
use landcomp::{LedgerIndex, Query};
use serde::Serialize;

use super::GlobalArgs;
use crate::config::Config;

/// One planned query as printed by `landcomp plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedQuery {
    pub location: String,
    pub size_range: String,
    pub price_range: String,
    pub url: String,
    pub complete: bool,
}

pub fn plan(config: &Config, index: &LedgerIndex) -> Result<Vec<PlannedQuery>> {
    let search = config.search_template();
    let queries: Vec<Query> = config.queries()?;
    Ok(queries
        .iter()
        .map(|q| PlannedQuery {
            location: q.location.clone(),
            size_range: q.size_range.label.clone(),
            price_range: q.price_range.label.clone(),
            url: search.render(q),
            complete: index.is_complete(&q.key()),
        })
        .collect())
}

/// Read-only: never creates the ledger or data directory.
pub fn run(global: &GlobalArgs, json: bool) -> Result<()> {
    let (config, paths) = global.load()?;
    let index = LedgerIndex::load(&paths.ledger)
        .with_context(|| format!("failed to read ledger {}", paths.ledger.display()))?;
    let planned = plan(&config, &index)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
        return Ok(());
    }

    if planned.is_empty() {
        println!("No queries: configure at least one location.");
        return Ok(());
    }
    let done = planned.iter().filter(|p| p.complete).count();
    for p in &planned {
        let mark = if p.complete { "[OK]" } else { "[  ]" };
        println!(
            "{mark} {:<10} {:<10} {:<14} {}",
            p.location, p.size_range, p.price_range, p.url
        );
    }
    println!();
    println!(
        "{} queries, {} complete, {} pending",
        planned.len(),
        done,
        planned.len() - done
    );
    Ok(())
}
