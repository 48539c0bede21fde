//! Core data types for sold-listing acquisition and price-per-acre benchmarks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Square feet in one acre.
pub const SQFT_PER_ACRE: f64 = 43_560.0;

/// A lot-size band in acres, used both to request data and to bucket results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeRange {
    pub label: String,
    /// Lower bound in acres (inclusive on the source side).
    pub min: f64,
    /// Upper bound in acres; `None` means open-ended.
    pub max: Option<f64>,
    /// Price ceiling applied to this band to exclude mislabeled structures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<u64>,
}

impl SizeRange {
    pub fn new(label: &str, min: f64, max: Option<f64>, max_price: Option<u64>) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
            max_price,
        }
    }
}

/// A sale-price band in dollars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    pub label: String,
    pub min: u64,
    /// Upper bound in dollars; `None` means unbounded.
    pub max: Option<u64>,
}

impl PriceRange {
    pub fn new(label: &str, min: u64, max: Option<u64>) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
        }
    }
}

/// One unit of acquisition work: a location crossed with a size and price band.
///
/// Immutable once generated by the partitioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub location: String,
    pub size_range: SizeRange,
    pub price_range: PriceRange,
}

impl Query {
    /// The ledger key used for idempotent skip-checks.
    pub fn key(&self) -> QueryKey {
        QueryKey {
            location: self.location.clone(),
            size_label: self.size_range.label.clone(),
            price_label: self.price_range.label.clone(),
        }
    }

    /// Raw output file name: `{location}_{sizeLabel}_{priceLabel}_{timestamp}.csv`.
    pub fn file_name(&self, timestamp: &str) -> String {
        format!(
            "{}_{}_{}_{}.csv",
            sanitize_component(&self.location),
            sanitize_component(&self.size_range.label),
            sanitize_component(&self.price_range.label),
            sanitize_component(timestamp)
        )
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} acres, {}]",
            self.location, self.size_range.label, self.price_range.label
        )
    }
}

/// Keep file-name components portable: anything outside `[A-Za-z0-9.+-]` becomes `_`.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Unique ledger key: (location, size label, price label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub location: String,
    pub size_label: String,
    pub price_label: String,
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.location, self.size_label, self.price_label
        )
    }
}

/// Lot-size bucket derived from acres via fixed breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeCategory {
    #[serde(rename = "0-0.25")]
    UpToQuarter,
    #[serde(rename = "0.25-0.5")]
    QuarterToHalf,
    #[serde(rename = "0.5-1")]
    HalfToOne,
    #[serde(rename = "1-3")]
    OneToThree,
    #[serde(rename = "3-5")]
    ThreeToFive,
    #[serde(rename = "5+")]
    FivePlus,
}

impl SizeCategory {
    /// All categories in ascending band order.
    pub const ALL: [SizeCategory; 6] = [
        SizeCategory::UpToQuarter,
        SizeCategory::QuarterToHalf,
        SizeCategory::HalfToOne,
        SizeCategory::OneToThree,
        SizeCategory::ThreeToFive,
        SizeCategory::FivePlus,
    ];

    /// Assign a category. Each upper breakpoint is inclusive.
    pub fn from_acres(acres: f64) -> Self {
        if acres <= 0.25 {
            Self::UpToQuarter
        } else if acres <= 0.5 {
            Self::QuarterToHalf
        } else if acres <= 1.0 {
            Self::HalfToOne
        } else if acres <= 3.0 {
            Self::OneToThree
        } else if acres <= 5.0 {
            Self::ThreeToFive
        } else {
            Self::FivePlus
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpToQuarter => "0-0.25",
            Self::QuarterToHalf => "0.25-0.5",
            Self::HalfToOne => "0.5-1",
            Self::OneToThree => "1-3",
            Self::ThreeToFive => "3-5",
            Self::FivePlus => "5+",
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical sold listing produced by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldListingRecord {
    pub address: String,
    pub zip: String,
    pub price: f64,
    pub lot_size_sqft: f64,
    pub acres: f64,
    pub price_per_acre: f64,
    pub size_category: SizeCategory,
    pub sale_date: Option<String>,
}

impl SoldListingRecord {
    /// Build a record, deriving acres, price-per-acre, and category.
    ///
    /// Returns `None` when price or lot size is non-positive (or not finite)
    /// or the zip is empty.
    pub fn new(
        address: &str,
        zip: &str,
        price: f64,
        lot_size_sqft: f64,
        sale_date: Option<String>,
    ) -> Option<Self> {
        if !(price.is_finite() && price > 0.0) {
            return None;
        }
        if !(lot_size_sqft.is_finite() && lot_size_sqft > 0.0) {
            return None;
        }
        let zip = zip.trim();
        if zip.is_empty() {
            return None;
        }

        let acres = lot_size_sqft / SQFT_PER_ACRE;
        Some(Self {
            address: address.trim().to_string(),
            zip: zip.to_string(),
            price,
            lot_size_sqft,
            acres,
            price_per_acre: price / acres,
            size_category: SizeCategory::from_acres(acres),
            sale_date,
        })
    }
}

/// Outcome of one query attempt as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Success,
    Failed,
    NoResults,
    NoDownloadButton,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NoResults => "no_results",
            Self::NoDownloadButton => "no_download_button",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which capture strategy produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    NativeDownload,
    NetworkInterception,
    AuthenticatedReplay,
}

impl CaptureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeDownload => "native_download",
            Self::NetworkInterception => "network_interception",
            Self::AuthenticatedReplay => "authenticated_replay",
        }
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the append-only ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub location: String,
    pub size_range_label: String,
    pub price_range_label: String,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_method: Option<CaptureMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

impl LedgerEntry {
    /// Start an entry for `query` stamped with the current UTC time.
    pub fn for_query(query: &Query, status: LedgerStatus, source_url: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            location: query.location.clone(),
            size_range_label: query.size_range.label.clone(),
            price_range_label: query.price_range.label.clone(),
            status,
            filename: None,
            file_size_bytes: None,
            capture_method: None,
            error: None,
            source_url: source_url.to_string(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey {
            location: self.location.clone(),
            size_label: self.size_range_label.clone(),
            price_label: self.price_range_label.clone(),
        }
    }
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum CompError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Query already recorded as success: {0}")]
    AlreadyComplete(QueryKey),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience result type.
pub type CompResult<T> = Result<T, CompError>;
