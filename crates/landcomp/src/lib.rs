//! landcomp: sold-land acquisition planning and price-per-acre benchmarks.

pub mod aggregate;
pub mod ingest;
pub mod ledger;
pub mod partition;
pub mod stats;
pub mod types;

pub use aggregate::{aggregate, MarketBucket, MarketMatrix};
pub use ingest::{ingest_dir, parse_reader, write_normalized_csv, IngestReport};
pub use ledger::{Ledger, LedgerIndex, LedgerSummary};
pub use partition::{
    default_price_ranges, default_size_ranges, partition, partition_locations, SearchTemplate,
};
pub use stats::{median, percentile, Distribution};
pub use types::*;
