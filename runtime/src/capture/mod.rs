//! Download capture engine.
//!
//! Obtains the CSV export for one query by trying each strategy in order:
//! native browser download, network interception, then authenticated
//! replay over plain HTTP. The first payload that carries the listing
//! columns wins; an empty body or an HTML page is not an export. If a strategy
//! fails while the page is asking for a sign-in, the engine runs the
//! session manager once and retries that strategy before moving on.

pub mod intercept;
pub mod native;
pub mod replay;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use landcomp::ingest::{count_data_rows, payload_columns};
use landcomp::{CaptureMethod, LedgerStatus, Query};

use crate::config::{Config, ConfigError};
use crate::http_client::HttpClient;
use crate::progress::{Emitter, PipelineEventKind};
use crate::renderer::{Locator, RenderContext};
use crate::session::{any_visible, probe_chain, ExportSelectors, LoginFailure, SessionManager};

pub use intercept::NetworkIntercept;
pub use native::NativeDownload;
pub use replay::AuthenticatedReplay;

/// Why a capture (or one strategy of it) did not produce a payload.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Login(#[from] LoginFailure),

    #[error("query matched no rows")]
    NoResults,

    #[error("export control not found")]
    MissingControl,

    #[error("capture produced an empty payload")]
    EmptyPayload,

    #[error("payload is not a listing export: {0}")]
    UnexpectedPayload(String),

    #[error("timed out waiting for {what} after {}s", after.as_secs_f64())]
    Timeout { what: &'static str, after: Duration },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    pub fn browser(e: anyhow::Error) -> Self {
        Self::Browser(format!("{e:#}"))
    }

    /// Ledger status recorded when a query ends with this error.
    pub fn ledger_status(&self) -> LedgerStatus {
        match self {
            Self::NoResults => LedgerStatus::NoResults,
            Self::MissingControl => LedgerStatus::NoDownloadButton,
            _ => LedgerStatus::Failed,
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Page states that no other strategy can change.
    fn is_definitive(&self) -> bool {
        matches!(self, Self::NoResults | Self::MissingControl | Self::Login(_))
    }
}

/// A successful capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSuccess {
    pub path: PathBuf,
    pub bytes: u64,
    pub method: CaptureMethod,
    /// Data rows in the payload.
    pub rows: usize,
    /// Row count reached the source's export cap.
    pub truncated: bool,
}

/// One query's capture request. The browser is already on `search_url`.
#[derive(Debug, Clone, Copy)]
pub struct CaptureJob<'a> {
    pub query: &'a Query,
    pub search_url: &'a str,
    /// Final path of the raw CSV.
    pub dest: &'a Path,
}

/// One way of obtaining the export payload.
#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn method(&self) -> CaptureMethod;

    /// Write the payload to `job.dest` and return its size in bytes.
    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<u64, CaptureError>;
}

/// Find the export control and click it.
///
/// When no control appears, an empty-results marker turns the miss into
/// [`CaptureError::NoResults`].
pub async fn trigger_export(
    ctx: &dyn RenderContext,
    selectors: &ExportSelectors,
    poll: Duration,
) -> Result<Locator, CaptureError> {
    let control = locate_export(ctx, selectors, poll).await?;
    ctx.click(&control).await.map_err(CaptureError::browser)?;
    tracing::debug!(control = %control, "export triggered");
    Ok(control)
}

pub(crate) async fn locate_export(
    ctx: &dyn RenderContext,
    selectors: &ExportSelectors,
    poll: Duration,
) -> Result<Locator, CaptureError> {
    match probe_chain(ctx, &selectors.export_control, poll).await {
        Some(control) => Ok(control),
        None if any_visible(ctx, &selectors.no_results).await => Err(CaptureError::NoResults),
        None => Err(CaptureError::MissingControl),
    }
}

/// Run the login flow, re-invoking it once if the first attempt fails.
pub async fn reauthenticate(
    session: &SessionManager,
    ctx: &mut dyn RenderContext,
    emitter: &Emitter,
) -> Result<(), CaptureError> {
    let mut attempt = 1;
    loop {
        match session.login(ctx).await {
            Ok(report) => {
                tracing::info!(steps = report.visited.len(), "session authenticated");
                emitter.emit(PipelineEventKind::LoginAttempted {
                    success: true,
                    stage: None,
                });
                return Ok(());
            }
            Err(failure) => {
                emitter.emit(PipelineEventKind::LoginAttempted {
                    success: false,
                    stage: Some(failure.stage.to_string()),
                });
                if attempt >= 2 {
                    return Err(failure.into());
                }
                tracing::warn!(stage = %failure.stage, "login failed, retrying once");
                attempt += 1;
            }
        }
    }
}

/// Engine-level knobs.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Source export row cap; reaching it flags truncation.
    pub row_cap: usize,
    pub nav_timeout_ms: u64,
}

/// Ordered strategies plus the re-authentication detour.
pub struct CaptureEngine {
    strategies: Vec<Box<dyn CaptureStrategy>>,
    settings: CaptureSettings,
}

impl CaptureEngine {
    pub fn new(strategies: Vec<Box<dyn CaptureStrategy>>, settings: CaptureSettings) -> Self {
        Self {
            strategies,
            settings,
        }
    }

    /// The three standard strategies wired from configuration.
    pub fn standard(
        config: &Config,
        staging: &Path,
        selectors: ExportSelectors,
    ) -> Result<Self, ConfigError> {
        let t = &config.timeouts;
        let poll = Duration::from_millis(t.probe_poll_ms);
        let strategies: Vec<Box<dyn CaptureStrategy>> = vec![
            Box::new(NativeDownload::new(
                selectors.clone(),
                staging.to_path_buf(),
                Duration::from_millis(t.download_ms),
                poll,
            )),
            Box::new(NetworkIntercept::new(
                selectors.clone(),
                config.export_pattern()?,
                Duration::from_millis(t.intercept_ms),
                poll,
            )),
            Box::new(AuthenticatedReplay::new(
                selectors,
                HttpClient::new(t.replay_ms),
                config.export_template(),
                &config.source.csrf_header,
                poll,
            )),
        ];
        Ok(Self::new(
            strategies,
            CaptureSettings {
                row_cap: config.source.row_cap,
                nav_timeout_ms: t.navigation_ms,
            },
        ))
    }

    pub fn methods(&self) -> Vec<CaptureMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Capture one query. Never panics; every outcome is a value.
    pub async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
        session: &SessionManager,
        emitter: &Emitter,
    ) -> Result<CaptureSuccess, CaptureError> {
        let mut reauthed = false;
        if session.needs_login(ctx).await {
            tracing::info!(query = %job.query, "sign-in required before capture");
            self.detour(ctx, job, session, emitter).await?;
            reauthed = true;
        }

        let mut last_err = CaptureError::EmptyPayload;
        for strategy in &self.strategies {
            let method = strategy.method();
            let mut outcome = self.attempt(strategy.as_ref(), ctx, job).await;

            if let Err(e) = &outcome {
                if !reauthed && !matches!(e, CaptureError::NoResults) && session.needs_login(ctx).await
                {
                    tracing::info!(method = %method, "sign-in surfaced mid-capture: {e}");
                    reauthed = true;
                    self.detour(ctx, job, session, emitter).await?;
                    outcome = self.attempt(strategy.as_ref(), ctx, job).await;
                }
            }

            match outcome {
                Ok((bytes, rows)) => return Ok(self.finish(job, method, bytes, rows)),
                Err(e) if e.is_definitive() => {
                    discard(job.dest).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(method = %method, "capture strategy failed: {e}");
                    discard(job.dest).await;
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Run one strategy and check that what it wrote is a listing export.
    /// Returns the payload size and its data row count.
    async fn attempt(
        &self,
        strategy: &dyn CaptureStrategy,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
    ) -> Result<(u64, usize), CaptureError> {
        let bytes = strategy.capture(ctx, job).await?;
        if bytes == 0 {
            return Err(CaptureError::EmptyPayload);
        }
        let payload = tokio::fs::read(job.dest).await?;
        let rows = inspect_payload(&payload)?;
        Ok((bytes, rows))
    }

    /// Log in and return to the query's results page.
    async fn detour(
        &self,
        ctx: &mut dyn RenderContext,
        job: &CaptureJob<'_>,
        session: &SessionManager,
        emitter: &Emitter,
    ) -> Result<(), CaptureError> {
        reauthenticate(session, ctx, emitter).await?;
        ctx.navigate(job.search_url, self.settings.nav_timeout_ms)
            .await
            .map_err(|e| CaptureError::Transient(format!("{e:#}")))?;
        Ok(())
    }

    fn finish(
        &self,
        job: &CaptureJob<'_>,
        method: CaptureMethod,
        bytes: u64,
        rows: usize,
    ) -> CaptureSuccess {
        let truncated = rows >= self.settings.row_cap;
        if truncated {
            tracing::warn!(
                location = %job.query.location,
                size = %job.query.size_range.label,
                price = %job.query.price_range.label,
                rows,
                cap = self.settings.row_cap,
                "export hit the row cap; narrow this price range"
            );
        }
        CaptureSuccess {
            path: job.dest.to_path_buf(),
            bytes,
            method,
            rows,
            truncated,
        }
    }
}

/// Data rows in a captured payload. A body without the price, zip and lot
/// columns (an expired-session page served with 200, an error document) is
/// rejected so the query is never recorded as a success.
fn inspect_payload(payload: &[u8]) -> Result<usize, CaptureError> {
    let head = String::from_utf8_lossy(&payload[..payload.len().min(512)]);
    if head.trim_start_matches('\u{feff}').trim_start().starts_with('<') {
        return Err(CaptureError::UnexpectedPayload("HTML document".into()));
    }
    if !payload_columns(payload).is_some_and(|c| c.is_usable()) {
        return Err(CaptureError::UnexpectedPayload(
            "missing price, zip or lot size column".into(),
        ));
    }
    match count_data_rows(payload) {
        0 => Err(CaptureError::NoResults),
        rows => Ok(rows),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), "could not remove partial capture: {e}");
        }
    }
}

/// Move `from` to `to`, copying across filesystems. Returns the file size.
pub(crate) async fn move_file(from: &Path, to: &Path) -> io::Result<u64> {
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(tokio::fs::metadata(to).await?.len())
}
