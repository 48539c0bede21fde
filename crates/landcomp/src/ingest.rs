//! CSV ingestion: heterogeneous export schemas → canonical sold listings.
//!
//! Each canonical field has an ordered list of accepted header spellings; the
//! first alias present in a file's header row wins for that file. Rows missing
//! a usable price, lot size, or zip are dropped silently.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Serialize;

use crate::types::{CompResult, SizeCategory, SoldListingRecord, SQFT_PER_ACRE};

pub const PRICE_ALIASES: &[&str] = &["PRICE", "SOLD PRICE", "SALE PRICE", "sold_price", "price"];
pub const LOT_SQFT_ALIASES: &[&str] = &[
    "LOT SIZE",
    "LOT SIZE (SQFT)",
    "LOT AREA",
    "lot_size_sqft",
    "lot_sqft",
];
pub const LOT_ACRES_ALIASES: &[&str] = &["ACRES", "LOT SIZE (ACRES)", "lot_acres", "acres"];
pub const ZIP_ALIASES: &[&str] = &["ZIP OR POSTAL CODE", "ZIP", "ZIP CODE", "POSTAL CODE", "zip_code"];
pub const ADDRESS_ALIASES: &[&str] = &["ADDRESS", "STREET ADDRESS", "address"];
pub const SALE_DATE_ALIASES: &[&str] = &["SOLD DATE", "SALE DATE", "DATE SOLD", "sold_date"];

/// Column positions resolved from one file's header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub price: Option<usize>,
    pub lot_sqft: Option<usize>,
    pub lot_acres: Option<usize>,
    pub zip: Option<usize>,
    pub address: Option<usize>,
    pub sale_date: Option<usize>,
}

impl ColumnMap {
    pub fn resolve(headers: &StringRecord) -> Self {
        Self {
            price: find_column(headers, PRICE_ALIASES),
            lot_sqft: find_column(headers, LOT_SQFT_ALIASES),
            lot_acres: find_column(headers, LOT_ACRES_ALIASES),
            zip: find_column(headers, ZIP_ALIASES),
            address: find_column(headers, ADDRESS_ALIASES),
            sale_date: find_column(headers, SALE_DATE_ALIASES),
        }
    }

    /// Price, zip, and some lot-size column are all present.
    pub fn is_usable(&self) -> bool {
        self.price.is_some()
            && self.zip.is_some()
            && (self.lot_sqft.is_some() || self.lot_acres.is_some())
    }

    /// Normalize one row, or `None` if it must be dropped.
    pub fn record(&self, row: &StringRecord) -> Option<SoldListingRecord> {
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(str::trim);

        let price = cell(self.price).and_then(parse_number)?;
        let lot_sqft = match cell(self.lot_sqft).and_then(parse_number) {
            Some(sqft) => sqft,
            None => cell(self.lot_acres).and_then(parse_number)? * SQFT_PER_ACRE,
        };
        let zip = cell(self.zip).and_then(normalize_zip)?;
        let address = cell(self.address).unwrap_or_default();
        let sale_date = cell(self.sale_date)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        SoldListingRecord::new(address, &zip, price, lot_sqft, sale_date)
    }
}

/// First alias (in priority order) matching a header, case-insensitively.
fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(alias))
    })
}

/// Parse `"$100,000"`, `" 10000 sq ft"`, `"0.5"`. Ignores a trailing unit.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '\u{a0}'))
        .collect();
    let end = cleaned
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(cleaned.len());
    let value: f64 = cleaned[..end].trim_end_matches('.').parse().ok()?;
    value.is_finite().then_some(value)
}

/// Leading five digits of a zip: `"32541-1234"` → `"32541"`, `"32541.0"` →
/// `"32541"`. Three- or four-digit values regain their stripped leading zeros.
pub fn normalize_zip(cell: &str) -> Option<String> {
    let digits: String = cell
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.len() {
        0..=2 => None,
        3 | 4 => Some(format!("{digits:0>5}")),
        _ => Some(digits[..5].to_string()),
    }
}

/// Result of ingesting one file.
#[derive(Debug, Clone, Default)]
pub struct FileIngest {
    pub records: Vec<SoldListingRecord>,
    pub rows_read: usize,
    pub rows_dropped: usize,
}

/// Parse one CSV export from any reader.
pub fn parse_reader<R: Read>(reader: R, source: &str) -> CompResult<FileIngest> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnMap::resolve(csv.headers()?);
    if !columns.is_usable() {
        tracing::warn!(source, ?columns, "export lacks price, zip, or lot size column");
    }

    let mut out = FileIngest::default();
    for row in csv.records() {
        out.rows_read += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!(source, "unreadable row dropped: {e}");
                out.rows_dropped += 1;
                continue;
            }
        };
        match columns.record(&row) {
            Some(rec) => out.records.push(rec),
            None => out.rows_dropped += 1,
        }
    }
    Ok(out)
}

/// Columns named by a payload's header row, or `None` when it has none.
pub fn payload_columns(bytes: &[u8]) -> Option<ColumnMap> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    csv.headers().ok().map(ColumnMap::resolve)
}

/// Count data rows in a CSV payload without normalizing them.
pub fn count_data_rows(bytes: &[u8]) -> usize {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes)
        .records()
        .filter_map(Result::ok)
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .count()
}

/// Totals from ingesting a directory of exports.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub records: Vec<SoldListingRecord>,
    pub files_read: usize,
    pub files_failed: usize,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub duplicates: usize,
}

/// Ingest every `*.csv` in `dir` (name order), collapsing duplicate listings.
///
/// A file that cannot be read or parsed is logged and skipped.
pub fn ingest_dir(dir: &Path) -> CompResult<IngestReport> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();

    let mut report = IngestReport::default();
    let mut seen = HashSet::new();

    for path in &paths {
        let source = path.display().to_string();
        let parsed = File::open(path)
            .map_err(Into::into)
            .and_then(|f| parse_reader(f, &source));
        let file = match parsed {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(file = %source, "skipping export: {e}");
                report.files_failed += 1;
                continue;
            }
        };

        report.files_read += 1;
        report.rows_read += file.rows_read;
        report.rows_dropped += file.rows_dropped;
        for rec in file.records {
            if seen.insert(dedupe_key(&rec)) {
                report.records.push(rec);
            } else {
                report.duplicates += 1;
            }
        }
    }

    tracing::info!(
        files = report.files_read,
        failed = report.files_failed,
        records = report.records.len(),
        dropped = report.rows_dropped,
        duplicates = report.duplicates,
        "ingestion complete"
    );
    Ok(report)
}

fn dedupe_key(rec: &SoldListingRecord) -> (String, String, u64, Option<String>) {
    (
        rec.address.to_ascii_lowercase(),
        rec.zip.clone(),
        rec.price.to_bits(),
        rec.sale_date.clone(),
    )
}

#[derive(Serialize)]
struct NormalizedRow<'a> {
    address: &'a str,
    zip: &'a str,
    price: f64,
    acres: f64,
    #[serde(rename = "pricePerAcre")]
    price_per_acre: f64,
    #[serde(rename = "sizeCategory")]
    size_category: SizeCategory,
    #[serde(rename = "saleDate")]
    sale_date: &'a str,
}

/// Write all records as one normalized CSV.
pub fn write_normalized_csv(records: &[SoldListingRecord], path: &Path) -> CompResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    for rec in records {
        wtr.serialize(NormalizedRow {
            address: &rec.address,
            zip: &rec.zip,
            price: rec.price,
            acres: rec.acres,
            price_per_acre: rec.price_per_acre,
            size_category: rec.size_category,
            sale_date: rec.sale_date.as_deref().unwrap_or(""),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_normalization() {
        let data = "PRICE,LOT SIZE,ZIP\n100000,10000,32541\n";
        let out = parse_reader(data.as_bytes(), "t").unwrap();
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert!((rec.acres - 0.2296).abs() < 1e-4);
        // 435,536 when acres is first rounded to 0.2296; exact value is 435,600
        assert!((rec.price_per_acre - 435_536.06).abs() / 435_536.06 < 1e-3);
        assert_eq!(rec.size_category, SizeCategory::UpToQuarter);
        assert_eq!(rec.zip, "32541");
    }

    #[test]
    fn test_missing_zip_dropped() {
        let data = "PRICE,LOT SIZE,ZIP\n100000,10000,\n50000,43560,32541\n";
        let out = parse_reader(data.as_bytes(), "t").unwrap();
        assert_eq!(out.rows_read, 2);
        assert_eq!(out.rows_dropped, 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].size_category, SizeCategory::HalfToOne);
    }

    #[test]
    fn test_alias_priority_and_case() {
        // "zip" alias list prefers ZIP OR POSTAL CODE over ZIP
        let data = "Sale Price,Lot Area,zip,Zip or Postal Code,Address,Sold Date\n\
                    \"$250,000\",\"87,120\",99999,32459,1 Bay Rd,2025-03-01\n";
        let out = parse_reader(data.as_bytes(), "t").unwrap();
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.zip, "32459");
        assert_eq!(rec.price, 250_000.0);
        assert!((rec.acres - 2.0).abs() < 1e-9);
        assert_eq!(rec.address, "1 Bay Rd");
        assert_eq!(rec.sale_date.as_deref(), Some("2025-03-01"));
    }

    #[test]
    fn test_acres_column_fallback() {
        let data = "PRICE,ACRES,ZIP\n300000,6,32541\n";
        let out = parse_reader(data.as_bytes(), "t").unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].size_category, SizeCategory::FivePlus);
        assert!((out.records[0].price_per_acre - 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_unusable_schema_drops_everything() {
        let data = "NAME,VALUE\na,1\nb,2\n";
        let out = parse_reader(data.as_bytes(), "t").unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.rows_dropped, 2);
    }

    #[test]
    fn test_payload_columns() {
        let csv = payload_columns(b"ADDRESS,PRICE,LOT SIZE,ZIP\n1 Main,1,1,32541\n").unwrap();
        assert!(csv.is_usable());

        let html = b"<!DOCTYPE html>\n<html><body>Please sign in</body></html>\n";
        assert!(!payload_columns(html).is_some_and(|c| c.is_usable()));
        assert!(!payload_columns(b"").is_some_and(|c| c.is_usable()));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_number("10000 sq ft"), Some(10_000.0));
        assert_eq!(parse_number("0.5"), Some(0.5));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("N/A"), None);
    }

    #[test]
    fn test_normalize_zip() {
        assert_eq!(normalize_zip("32541-1234").as_deref(), Some("32541"));
        assert_eq!(normalize_zip("32541.0").as_deref(), Some("32541"));
        assert_eq!(normalize_zip("2108").as_deref(), Some("02108"));
        assert_eq!(normalize_zip(""), None);
        assert_eq!(normalize_zip("FL"), None);
    }

    #[test]
    fn test_count_data_rows() {
        assert_eq!(count_data_rows(b"PRICE,ZIP\n"), 0);
        assert_eq!(count_data_rows(b"PRICE,ZIP\n1,2\n3,4\n"), 2);
        assert_eq!(count_data_rows(b""), 0);
    }

    #[test]
    fn test_ingest_dir_dedupes_and_skips_non_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.csv"),
            "PRICE,LOT SIZE,ZIP,ADDRESS\n50000,43560,32541,1 Oak\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.csv"),
            "PRICE,LOT SIZE,ZIP,ADDRESS\n50000,43560,32541,1 OAK\n75000,21780,32541,2 Elm\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let report = ingest_dir(dir.path()).unwrap();
        assert_eq!(report.files_read, 2);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rows_read, 3);
    }

    #[test]
    fn test_write_normalized_csv_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/normalized.csv");
        let rec = SoldListingRecord::new("1 Oak", "32541", 50_000.0, 43_560.0, None).unwrap();
        write_normalized_csv(&[rec], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("address,zip,price,acres,pricePerAcre,sizeCategory,saleDate")
        );
        assert_eq!(lines.next(), Some("1 Oak,32541,50000.0,1.0,50000.0,0.5-1,"));
    }
}
