//! Query partitioning: location × size band × price band.
//!
//! The source truncates each export at a fixed row count, so large size bands
//! in dense locations are split by price until every query stays under the cap.

use crate::types::{CompError, CompResult, PriceRange, Query, SizeRange};

/// Price ceiling applied to the sub-acre bands.
pub const SUB_ACRE_MAX_PRICE: u64 = 190_000;

/// The fixed lot-size bands, in ascending order.
pub fn default_size_ranges() -> Vec<SizeRange> {
    vec![
        SizeRange::new("0-0.25", 0.0, Some(0.25), Some(SUB_ACRE_MAX_PRICE)),
        SizeRange::new("0.25-0.5", 0.25, Some(0.5), Some(SUB_ACRE_MAX_PRICE)),
        SizeRange::new("0.5-1", 0.5, Some(1.0), Some(SUB_ACRE_MAX_PRICE)),
        SizeRange::new("1-3", 1.0, Some(3.0), None),
        SizeRange::new("3-5", 3.0, Some(5.0), None),
        SizeRange::new("5+", 5.0, None, None),
    ]
}

/// Price bands sized so a single band rarely exceeds the export cap.
pub fn default_price_ranges() -> Vec<PriceRange> {
    vec![
        PriceRange::new("0-25k", 0, Some(25_000)),
        PriceRange::new("25k-50k", 25_000, Some(50_000)),
        PriceRange::new("50k-75k", 50_000, Some(75_000)),
        PriceRange::new("75k-100k", 75_000, Some(100_000)),
        PriceRange::new("100k-150k", 100_000, Some(150_000)),
        PriceRange::new("150k-190k", 150_000, Some(190_000)),
        PriceRange::new("190k-300k", 190_000, Some(300_000)),
        PriceRange::new("300k-500k", 300_000, Some(500_000)),
        PriceRange::new("500k-1m", 500_000, Some(1_000_000)),
        PriceRange::new("1m+", 1_000_000, None),
    ]
}

/// Price ranges applicable to `size`.
///
/// With a `max_price` cap only bounded ranges whose upper bound is at or below
/// the cap survive; without one the full list is returned unchanged.
pub fn applicable_price_ranges<'a>(
    size: &SizeRange,
    prices: &'a [PriceRange],
) -> Vec<&'a PriceRange> {
    match size.max_price {
        Some(cap) => prices
            .iter()
            .filter(|p| matches!(p.max, Some(max) if max <= cap))
            .collect(),
        None => prices.iter().collect(),
    }
}

/// Expand one location into a (size, price) cross-product of queries.
///
/// A size band with no applicable price range contributes no queries.
pub fn partition(location: &str, sizes: &[SizeRange], prices: &[PriceRange]) -> Vec<Query> {
    let mut queries = Vec::new();
    for size in sizes {
        for price in applicable_price_ranges(size, prices) {
            queries.push(Query {
                location: location.to_string(),
                size_range: size.clone(),
                price_range: price.clone(),
            });
        }
    }
    queries
}

/// Partition several locations, preserving their order.
pub fn partition_locations(
    locations: &[String],
    sizes: &[SizeRange],
    prices: &[PriceRange],
) -> Vec<Query> {
    locations
        .iter()
        .flat_map(|loc| partition(loc, sizes, prices))
        .collect()
}

/// Reject malformed band lists (e.g. from a user configuration file).
pub fn validate_ranges(sizes: &[SizeRange], prices: &[PriceRange]) -> CompResult<()> {
    for s in sizes {
        if s.label.trim().is_empty() {
            return Err(CompError::InvalidRange("size range with empty label".into()));
        }
        if s.min < 0.0 || matches!(s.max, Some(max) if max <= s.min) {
            return Err(CompError::InvalidRange(format!(
                "size range {} has bounds {}..{:?}",
                s.label, s.min, s.max
            )));
        }
    }
    for p in prices {
        if p.label.trim().is_empty() {
            return Err(CompError::InvalidRange("price range with empty label".into()));
        }
        if matches!(p.max, Some(max) if max <= p.min) {
            return Err(CompError::InvalidRange(format!(
                "price range {} has bounds {}..{:?}",
                p.label, p.min, p.max
            )));
        }
    }

    let mut labels: Vec<&str> = sizes.iter().map(|s| s.label.as_str()).collect();
    labels.sort_unstable();
    if labels.windows(2).any(|w| w[0] == w[1]) {
        return Err(CompError::InvalidRange("duplicate size range label".into()));
    }
    let mut labels: Vec<&str> = prices.iter().map(|p| p.label.as_str()).collect();
    labels.sort_unstable();
    if labels.windows(2).any(|w| w[0] == w[1]) {
        return Err(CompError::InvalidRange("duplicate price range label".into()));
    }
    Ok(())
}

/// Renders a source search URL for a query.
///
/// Placeholders: `{location}`, `{min_acres}`, `{max_acres}`, `{min_price}`,
/// `{max_price}`. Open upper bounds render as an empty string.
#[derive(Debug, Clone)]
pub struct SearchTemplate {
    template: String,
}

impl SearchTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render(&self, query: &Query) -> String {
        let max_acres = query
            .size_range
            .max
            .map(|a| a.to_string())
            .unwrap_or_default();
        let max_price = query
            .price_range
            .max
            .map(|p| p.to_string())
            .unwrap_or_default();

        self.template
            .replace("{location}", &query.location)
            .replace("{min_acres}", &query.size_range.min.to_string())
            .replace("{max_acres}", &max_acres)
            .replace("{min_price}", &query.price_range.min.to_string())
            .replace("{max_price}", &max_price)
    }
}
