//! Append-only JSONL ledger of query outcomes.
//!
//! - One JSON object per line, flushed and synced per entry so a killed
//!   process leaves a consistent, resumable file.
//! - A `success` entry for a key is permanent: the key is skipped on every
//!   later run and a second `success` for it is refused.
//! - A torn final line (partial write) is skipped with a warning when the
//!   ledger is reopened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::{CompError, CompResult, LedgerEntry, LedgerStatus, Query, QueryKey};

/// Single-writer, append-only ledger.
pub struct Ledger {
    file: File,
    path: PathBuf,
    index: LedgerIndex,
}

/// In-memory view of a ledger's entries: completed keys and the latest
/// status per key. Usable without holding the file open for writing.
#[derive(Debug, Clone, Default)]
pub struct LedgerIndex {
    completed: HashSet<QueryKey>,
    latest: HashMap<QueryKey, LedgerStatus>,
    entry_count: usize,
}

/// Latest-status counts across all keys in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub entries: usize,
    pub keys: usize,
    pub success: usize,
    pub failed: usize,
    pub no_results: usize,
    pub no_download_button: usize,
    /// Per-location count of keys whose latest status is `success`.
    pub completed_by_location: BTreeMap<String, usize>,
}

impl Ledger {
    /// Open or create the ledger, replaying existing entries.
    pub fn open(path: &Path) -> CompResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            read_entries(path)?
        } else {
            Vec::new()
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if !ends_with_newline(path)? {
            // Terminate a torn line so the next entry starts clean.
            writeln!(file)?;
        }

        let index = LedgerIndex::from_entries(&entries);
        tracing::debug!(
            path = %path.display(),
            entries = index.entry_count,
            completed = index.completed.len(),
            "ledger opened"
        );
        Ok(Self {
            file,
            path: path.to_path_buf(),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &LedgerIndex {
        &self.index
    }

    /// True when `key` already has a `success` entry.
    pub fn is_complete(&self, key: &QueryKey) -> bool {
        self.index.is_complete(key)
    }

    /// Keys among `queries` that would be skipped, in query order.
    pub fn skip_set(&self, queries: &[Query]) -> Vec<QueryKey> {
        self.index.skip_set(queries)
    }

    /// Queries still needing an attempt, in order.
    pub fn pending<'a>(&self, queries: &'a [Query]) -> Vec<&'a Query> {
        self.index.pending(queries)
    }

    /// Append an entry and flush it to disk.
    ///
    /// Fails with [`CompError::AlreadyComplete`] if the key already succeeded.
    pub fn append(&mut self, entry: &LedgerEntry) -> CompResult<()> {
        let key = entry.key();
        if self.index.is_complete(&key) {
            return Err(CompError::AlreadyComplete(key));
        }

        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        self.file.flush()?;
        self.file.sync_data()?;

        self.index.insert(entry);
        Ok(())
    }

    pub fn summary(&self) -> LedgerSummary {
        self.index.summary()
    }
}

impl LedgerIndex {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    /// Build an index from a ledger file without opening it for writing.
    /// A missing file yields an empty index.
    pub fn load(path: &Path) -> CompResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::from_entries(&read_entries(path)?))
    }

    pub fn is_complete(&self, key: &QueryKey) -> bool {
        self.completed.contains(key)
    }

    pub fn latest_status(&self, key: &QueryKey) -> Option<LedgerStatus> {
        self.latest.get(key).copied()
    }

    pub fn skip_set(&self, queries: &[Query]) -> Vec<QueryKey> {
        queries
            .iter()
            .map(Query::key)
            .filter(|k| self.is_complete(k))
            .collect()
    }

    pub fn pending<'a>(&self, queries: &'a [Query]) -> Vec<&'a Query> {
        queries
            .iter()
            .filter(|q| !self.is_complete(&q.key()))
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary {
            entries: self.entry_count,
            keys: self.latest.len(),
            ..Default::default()
        };
        for (key, status) in &self.latest {
            match status {
                LedgerStatus::Success => {
                    summary.success += 1;
                    *summary
                        .completed_by_location
                        .entry(key.location.clone())
                        .or_default() += 1;
                }
                LedgerStatus::Failed => summary.failed += 1,
                LedgerStatus::NoResults => summary.no_results += 1,
                LedgerStatus::NoDownloadButton => summary.no_download_button += 1,
            }
        }
        summary
    }

    fn insert(&mut self, entry: &LedgerEntry) {
        let key = entry.key();
        self.entry_count += 1;
        if self.completed.contains(&key) {
            // A later non-success line never demotes a completed key.
            return;
        }
        if entry.status == LedgerStatus::Success {
            self.completed.insert(key.clone());
        }
        self.latest.insert(key, entry.status);
    }
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(path: &Path) -> CompResult<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Read every parseable entry from a ledger file.
///
/// Safe to call while another process appends: the last line may be partial
/// and is skipped like any other unparseable line.
pub fn read_entries(path: &Path) -> CompResult<Vec<LedgerEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (lineno, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        // A kill mid-append can cut a multibyte character in half.
        let line = match std::str::from_utf8(&line) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    "skipping non-UTF-8 ledger line: {e}"
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    "skipping unparseable ledger line: {e}"
                );
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{default_price_ranges, default_size_ranges, partition};
    use crate::types::CaptureMethod;

    fn entry(query: &Query, status: LedgerStatus) -> LedgerEntry {
        let mut e = LedgerEntry::for_query(query, status, "https://src.test/q");
        if status == LedgerStatus::Success {
            e.filename = Some("f.csv".into());
            e.file_size_bytes = Some(42);
            e.capture_method = Some(CaptureMethod::NativeDownload);
        } else {
            e.error = Some("boom".into());
        }
        e
    }

    fn queries() -> Vec<Query> {
        partition("32541", &default_size_ranges(), &default_price_ranges())
    }

    #[test]
    fn test_success_is_skipped_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = queries();

        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(&entry(&qs[0], LedgerStatus::Success)).unwrap();
            ledger.append(&entry(&qs[1], LedgerStatus::Failed)).unwrap();
            ledger.append(&entry(&qs[2], LedgerStatus::NoResults)).unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_complete(&qs[0].key()));
        assert!(!ledger.is_complete(&qs[1].key()));
        assert!(!ledger.is_complete(&qs[2].key()));
        assert_eq!(ledger.pending(&qs).len(), qs.len() - 1);
    }

    #[test]
    fn test_skip_set_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = queries();
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.append(&entry(&qs[3], LedgerStatus::Success)).unwrap();
        ledger.append(&entry(&qs[7], LedgerStatus::Success)).unwrap();

        let first = ledger.skip_set(&qs);
        let second = ledger.skip_set(&qs);
        let reopened = Ledger::open(&path).unwrap().skip_set(&qs);
        assert_eq!(first, vec![qs[3].key(), qs[7].key()]);
        assert_eq!(first, second);
        assert_eq!(first, reopened);
    }

    #[test]
    fn test_second_success_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = queries();
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.append(&entry(&qs[0], LedgerStatus::Success)).unwrap();

        let err = ledger.append(&entry(&qs[0], LedgerStatus::Success));
        assert!(matches!(err, Err(CompError::AlreadyComplete(_))));
        let err = ledger.append(&entry(&qs[0], LedgerStatus::Failed));
        assert!(matches!(err, Err(CompError::AlreadyComplete(_))));

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn test_failure_then_success_completes_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = queries();
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.append(&entry(&qs[0], LedgerStatus::Failed)).unwrap();
        ledger.append(&entry(&qs[0], LedgerStatus::Success)).unwrap();

        let summary = ledger.summary();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.keys, 1);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.completed_by_location.get("32541"), Some(&1));
    }

    #[test]
    fn test_torn_last_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = queries();
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(&entry(&qs[0], LedgerStatus::Success)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            write!(f, "{{\"timestamp\":\"2026-").unwrap();
        }

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_complete(&qs[0].key()));
        assert_eq!(ledger.summary().entries, 1);

        ledger.append(&entry(&qs[1], LedgerStatus::Success)).unwrap();
        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.is_complete(&qs[1].key()));
        assert_eq!(reopened.summary().entries, 2);
    }

    #[test]
    fn test_line_torn_inside_multibyte_char_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let qs = partition("Cañon City", &default_size_ranges(), &default_price_ranges());
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(&entry(&qs[0], LedgerStatus::Success)).unwrap();
        }
        {
            // Cut one byte into the two-byte "ñ".
            let line = serde_json::to_string(&entry(&qs[1], LedgerStatus::Success)).unwrap();
            let cut = line.find('ñ').unwrap() + 1;
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&line.as_bytes()[..cut]).unwrap();
        }

        let index = LedgerIndex::load(&path).unwrap();
        assert!(index.is_complete(&qs[0].key()));
        assert_eq!(index.summary().entries, 1);

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(!ledger.is_complete(&qs[1].key()));
        ledger.append(&entry(&qs[1], LedgerStatus::Success)).unwrap();
        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.is_complete(&qs[1].key()));
        assert_eq!(reopened.summary().entries, 2);
    }

    #[test]
    fn test_index_load_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        assert_eq!(LedgerIndex::load(&path).unwrap().summary().entries, 0);
        assert!(!path.exists());

        let qs = queries();
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(&entry(&qs[0], LedgerStatus::NoDownloadButton)).unwrap();
            ledger.append(&entry(&qs[1], LedgerStatus::Success)).unwrap();
        }
        let before = std::fs::read(&path).unwrap();
        let index = LedgerIndex::load(&path).unwrap();
        assert_eq!(
            index.latest_status(&qs[0].key()),
            Some(LedgerStatus::NoDownloadButton)
        );
        assert!(index.is_complete(&qs[1].key()));
        assert_eq!(index.summary().no_download_button, 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/ledger.jsonl");
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.summary(), LedgerSummary::default());
        assert!(path.exists());
    }
}
