//! Aggregation engine: the zip × size-category fair-value matrix.
//!
//! Always rebuilt from the full record set; nothing is updated incrementally.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::stats::Distribution;
use crate::types::{CompResult, SizeCategory, SoldListingRecord};

/// Price-per-acre statistics for one (zip, size category) group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBucket {
    pub zip: String,
    pub size_category: SizeCategory,
    pub count: usize,
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

impl MarketBucket {
    fn new(zip: &str, size_category: SizeCategory, d: Distribution) -> Self {
        Self {
            zip: zip.to_string(),
            size_category,
            count: d.count,
            median: d.median,
            mean: d.mean,
            min: d.min,
            max: d.max,
            q1: d.q1,
            q3: d.q3,
        }
    }
}

/// Nested matrix: zip → size category → statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMatrix {
    pub zips: BTreeMap<String, BTreeMap<SizeCategory, Distribution>>,
}

impl MarketMatrix {
    pub fn get(&self, zip: &str, category: SizeCategory) -> Option<&Distribution> {
        self.zips.get(zip).and_then(|m| m.get(&category))
    }

    pub fn bucket_count(&self) -> usize {
        self.zips.values().map(BTreeMap::len).sum()
    }

    /// One row per bucket, ordered by zip then band.
    pub fn flatten(&self) -> Vec<MarketBucket> {
        self.zips
            .iter()
            .flat_map(|(zip, cats)| {
                cats.iter()
                    .map(move |(cat, d)| MarketBucket::new(zip, *cat, *d))
            })
            .collect()
    }

    /// Write the nested form as pretty JSON.
    pub fn write_json(&self, path: &Path) -> CompResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.zips)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write the flattened form as CSV.
    pub fn write_csv(&self, path: &Path) -> CompResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut wtr = csv::Writer::from_path(path)?;
        for bucket in self.flatten() {
            wtr.serialize(bucket)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Group records by (zip, size category) and compute each group's statistics.
pub fn aggregate(records: &[SoldListingRecord]) -> MarketMatrix {
    let mut groups: BTreeMap<&str, BTreeMap<SizeCategory, Vec<f64>>> = BTreeMap::new();
    for rec in records {
        groups
            .entry(rec.zip.as_str())
            .or_default()
            .entry(rec.size_category)
            .or_default()
            .push(rec.price_per_acre);
    }

    let mut matrix = MarketMatrix::default();
    for (zip, cats) in groups {
        let row = matrix.zips.entry(zip.to_string()).or_default();
        for (cat, values) in cats {
            if let Some(d) = Distribution::from_values(&values) {
                row.insert(cat, d);
            }
        }
    }

    tracing::debug!(
        zips = matrix.zips.len(),
        buckets = matrix.bucket_count(),
        records = records.len(),
        "aggregation complete"
    );
    matrix
}
