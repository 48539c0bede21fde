//! Ingest raw exports and write the normalized CSV and fair-value matrix.

use anyhow::{Context, Result};
use landcomp::{aggregate, ingest_dir, write_normalized_csv};

use super::GlobalArgs;
use crate::config::DataPaths;

/// What an aggregation pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOutcome {
    pub files_read: usize,
    pub files_failed: usize,
    pub records: usize,
    pub rows_dropped: usize,
    pub duplicates: usize,
    pub buckets: usize,
}

/// Rebuild every output from the full raw directory.
pub fn aggregate_dir(paths: &DataPaths) -> Result<AggregateOutcome> {
    std::fs::create_dir_all(&paths.raw)
        .with_context(|| format!("failed to create {}", paths.raw.display()))?;
    std::fs::create_dir_all(&paths.output)
        .with_context(|| format!("failed to create {}", paths.output.display()))?;

    let report = ingest_dir(&paths.raw)
        .with_context(|| format!("failed to ingest {}", paths.raw.display()))?;
    write_normalized_csv(&report.records, &paths.normalized_csv())
        .context("failed to write normalized CSV")?;

    let matrix = aggregate(&report.records);
    matrix
        .write_json(&paths.matrix_json())
        .context("failed to write matrix JSON")?;
    matrix
        .write_csv(&paths.matrix_csv())
        .context("failed to write matrix CSV")?;

    tracing::info!(
        records = report.records.len(),
        buckets = matrix.bucket_count(),
        "aggregation complete"
    );
    Ok(AggregateOutcome {
        files_read: report.files_read,
        files_failed: report.files_failed,
        records: report.records.len(),
        rows_dropped: report.rows_dropped,
        duplicates: report.duplicates,
        buckets: matrix.bucket_count(),
    })
}

pub fn print_outcome(paths: &DataPaths, outcome: &AggregateOutcome) {
    println!(
        "Ingested {} records from {} files ({} rows dropped, {} duplicates)",
        outcome.records, outcome.files_read, outcome.rows_dropped, outcome.duplicates
    );
    if outcome.files_failed > 0 {
        println!("[!!] {} files could not be parsed", outcome.files_failed);
    }
    println!("Buckets: {}", outcome.buckets);
    println!("  {}", paths.normalized_csv().display());
    println!("  {}", paths.matrix_json().display());
    println!("  {}", paths.matrix_csv().display());
}

pub fn run(global: &GlobalArgs) -> Result<()> {
    let (_, paths) = global.load()?;
    let outcome = aggregate_dir(&paths)?;
    print_outcome(&paths, &outcome);
    Ok(())
}
