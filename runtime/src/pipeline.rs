//! Batch driver: skip-check, throttle, navigate, capture, record.
//!
//! Exactly one query is in flight at a time. Every per-query failure ends
//! up as a ledger entry and the batch moves on.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use landcomp::partition::SearchTemplate;
use landcomp::{Ledger, LedgerEntry, LedgerStatus, Query};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::capture::{CaptureEngine, CaptureError, CaptureJob};
use crate::config::{Config, Credentials, DataPaths};
use crate::progress::{Emitter, PipelineEventKind};
use crate::renderer::RenderContext;
use crate::session::{ExportSelectors, SessionManager};
use crate::throttle::{RetryPolicy, Throttle};

/// Raw file timestamp, UTC, sortable and filesystem-safe.
const FILE_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub no_results: usize,
    pub no_download_button: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, status: LedgerStatus) {
        match status {
            LedgerStatus::Success => self.succeeded += 1,
            LedgerStatus::NoResults => self.no_results += 1,
            LedgerStatus::NoDownloadButton => self.no_download_button += 1,
            LedgerStatus::Failed => self.failed += 1,
        }
    }
}

pub struct Pipeline {
    ledger: Ledger,
    session: SessionManager,
    engine: CaptureEngine,
    search: SearchTemplate,
    throttle: Throttle,
    retry: RetryPolicy,
    nav_timeout_ms: u64,
    raw_dir: PathBuf,
    emitter: Emitter,
}

impl Pipeline {
    pub fn new(
        ledger: Ledger,
        session: SessionManager,
        engine: CaptureEngine,
        search: SearchTemplate,
        raw_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            session,
            engine,
            search,
            throttle: Throttle::disabled(),
            retry: RetryPolicy {
                attempts: 1,
                base: Duration::ZERO,
            },
            nav_timeout_ms: 30_000,
            raw_dir: raw_dir.into(),
            emitter: Emitter::silent(),
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_nav_timeout(mut self, ms: u64) -> Self {
        self.nav_timeout_ms = ms;
        self
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Wire a pipeline from configuration. Creates the data directories and
    /// opens the ledger.
    pub fn from_config(
        config: &Config,
        paths: &DataPaths,
        credentials: Credentials,
        emitter: Emitter,
    ) -> anyhow::Result<Self> {
        paths
            .ensure()
            .with_context(|| format!("failed to create {}", paths.root.display()))?;
        let ledger = Ledger::open(&paths.ledger)
            .with_context(|| format!("failed to open ledger {}", paths.ledger.display()))?;

        let t = &config.timeouts;
        let session = SessionManager::new(credentials, &config.source.login_url).with_timing(
            t.navigation_ms,
            Duration::from_millis(t.probe_poll_ms),
            Duration::from_millis(t.login_settle_ms),
        );
        let engine = CaptureEngine::standard(config, &paths.downloads, ExportSelectors::default())?;

        Ok(Self::new(ledger, session, engine, config.search_template(), &paths.raw)
            .with_throttle(Throttle::new(&config.throttle))
            .with_retry(RetryPolicy::new(&config.retry))
            .with_nav_timeout(t.navigation_ms)
            .with_emitter(emitter))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Process every query not yet recorded as a success.
    pub async fn run(&mut self, ctx: &mut dyn RenderContext, queries: &[Query]) -> RunSummary {
        let span = tracing::info_span!("run", run_id = %self.emitter.run_id());
        self.run_queries(ctx, queries).instrument(span).await
    }

    async fn run_queries(&mut self, ctx: &mut dyn RenderContext, queries: &[Query]) -> RunSummary {
        let mut summary = RunSummary::default();
        let pending = self.ledger.pending(queries);
        self.emitter.emit(PipelineEventKind::RunStarted {
            total: queries.len(),
            pending: pending.len(),
        });
        tracing::info!(total = queries.len(), pending = pending.len(), "starting batch");

        for query in queries {
            if self.ledger.is_complete(&query.key()) {
                summary.skipped += 1;
                tracing::debug!(query = %query, "already captured, skipping");
                self.emitter.emit(PipelineEventKind::QuerySkipped {
                    key: query.key().to_string(),
                });
            }
        }

        for (index, query) in pending.iter().enumerate() {
            summary.attempted += 1;
            self.throttle.wait().await;

            let url = self.search.render(query);
            self.emitter.emit(PipelineEventKind::QueryStarted {
                index,
                total: pending.len(),
                key: query.key().to_string(),
                url: url.clone(),
            });

            let entry = self.process(ctx, query, &url).await;
            self.throttle.record(entry.status == LedgerStatus::Failed);
            summary.record(entry.status);

            if let Err(e) = self.ledger.append(&entry) {
                tracing::error!(query = %query, "failed to record ledger entry: {e}");
            }
            self.emitter.emit(PipelineEventKind::QueryFinished {
                key: query.key().to_string(),
                status: entry.status,
                method: entry.capture_method,
                bytes: entry.file_size_bytes,
                error: entry.error.clone(),
            });
        }

        tracing::info!(
            attempted = summary.attempted,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            no_results = summary.no_results,
            no_download_button = summary.no_download_button,
            failed = summary.failed,
            "batch complete"
        );
        self.emitter.emit(PipelineEventKind::RunComplete {
            summary: summary.clone(),
        });
        summary
    }

    /// One query, start to finish. Always yields an entry.
    async fn process(&self, ctx: &mut dyn RenderContext, query: &Query, url: &str) -> LedgerEntry {
        let span = tracing::info_span!(
            "query",
            location = %query.location,
            size = %query.size_range.label,
            price = %query.price_range.label,
        );
        async {
            if let Err(e) = self.navigate(ctx, url).await {
                return failure(query, url, &e);
            }

            let timestamp = chrono::Utc::now().format(FILE_TIMESTAMP).to_string();
            let file_name = query.file_name(&timestamp);
            let dest = self.raw_dir.join(&file_name);
            let job = CaptureJob {
                query,
                search_url: url,
                dest: &dest,
            };

            match self
                .engine
                .capture(ctx, &job, &self.session, &self.emitter)
                .await
            {
                Ok(ok) => {
                    tracing::info!(method = %ok.method, bytes = ok.bytes, rows = ok.rows, "captured");
                    let mut entry = LedgerEntry::for_query(query, LedgerStatus::Success, url);
                    entry.filename = Some(file_name);
                    entry.file_size_bytes = Some(ok.bytes);
                    entry.capture_method = Some(ok.method);
                    entry
                }
                Err(e) => failure(query, url, &e),
            }
        }
        .instrument(span)
        .await
    }

    /// Navigate with bounded attempts and doubling backoff.
    async fn navigate(&self, ctx: &mut dyn RenderContext, url: &str) -> Result<(), CaptureError> {
        let mut attempt = 1;
        loop {
            match ctx.navigate(url, self.nav_timeout_ms).await {
                Ok(nav) => {
                    tracing::debug!(final_url = %nav.final_url, load_ms = nav.load_time_ms, "navigated");
                    return Ok(());
                }
                Err(e) if attempt >= self.retry.attempts => {
                    return Err(CaptureError::Transient(format!(
                        "navigation failed after {attempt} attempts: {e:#}"
                    )));
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "navigation failed: {e:#}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn failure(query: &Query, url: &str, error: &CaptureError) -> LedgerEntry {
    let status = error.ledger_status();
    match status {
        LedgerStatus::Failed => tracing::warn!("query failed: {error}"),
        _ => tracing::info!(status = %status, "{error}"),
    }
    let mut entry = LedgerEntry::for_query(query, status, url);
    entry.error = Some(error.to_string());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_each_status() {
        let mut summary = RunSummary::default();
        for status in [
            LedgerStatus::Success,
            LedgerStatus::Success,
            LedgerStatus::NoResults,
            LedgerStatus::NoDownloadButton,
            LedgerStatus::Failed,
        ] {
            summary.record(status);
        }
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.no_results, 1);
        assert_eq!(summary.no_download_button, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_failure_entry_carries_status_and_error() {
        let query = Query {
            location: "32541".into(),
            size_range: landcomp::SizeRange::new("5+", 5.0, None, None),
            price_range: landcomp::PriceRange::new("1m+", 1_000_000, None),
        };
        let entry = failure(&query, "https://src.test/s", &CaptureError::MissingControl);
        assert_eq!(entry.status, LedgerStatus::NoDownloadButton);
        assert_eq!(entry.error.as_deref(), Some("export control not found"));
        assert_eq!(entry.source_url, "https://src.test/s");
    }
}
