//! `landcomp run`: acquire every pending query, then aggregate.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use landcomp::{LedgerIndex, LedgerStatus, Query};
use tokio::sync::broadcast::error::RecvError;

use super::aggregate_cmd::{aggregate_dir, print_outcome};
use super::GlobalArgs;
use crate::config::Credentials;
use crate::pipeline::{Pipeline, RunSummary};
use crate::progress::{self, Emitter, EventReceiver, PipelineEventKind};
use crate::renderer::chromium::{BrowserOptions, ChromiumRenderer};
use crate::renderer::Renderer;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub no_aggregate: bool,
    /// Replaces the configured locations when non-empty.
    pub locations: Vec<String>,
    pub headed: bool,
    /// Cap on pending queries attempted this run.
    pub limit: Option<usize>,
}

pub async fn run(global: &GlobalArgs, opts: RunOptions) -> Result<()> {
    let (mut config, paths) = global.load()?;
    if !opts.locations.is_empty() {
        config.locations = opts.locations.clone();
    }
    if opts.headed {
        config.headless = false;
    }

    // Environment preconditions abort before any query is attempted.
    config.validate_for_run()?;
    let credentials = Credentials::resolve(config.credentials.as_ref())?;

    let mut queries = config.queries()?;
    if let Some(limit) = opts.limit {
        let index = LedgerIndex::load(&paths.ledger)
            .with_context(|| format!("failed to read ledger {}", paths.ledger.display()))?;
        limit_pending(&mut queries, &index, limit);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = progress::channel();
    let mut pipeline = Pipeline::from_config(&config, &paths, credentials, Emitter::new(Some(tx), &run_id))?;

    let renderer = ChromiumRenderer::launch(&BrowserOptions {
        headless: config.headless,
        chromium_path: None,
    })
    .await
    .context("failed to launch Chromium")?;
    let mut ctx = renderer.new_context().await?;

    let bar = tokio::spawn(render_progress(rx));
    let summary = pipeline.run(ctx.as_mut(), &queries).await;
    drop(pipeline);

    if let Err(e) = ctx.close().await {
        tracing::debug!("closing page: {e:#}");
    }
    if let Err(e) = renderer.shutdown().await {
        tracing::debug!("browser shutdown: {e:#}");
    }
    let _ = bar.await;

    print_summary(&run_id, &summary);

    if !opts.no_aggregate {
        println!();
        let outcome = aggregate_dir(&paths)?;
        print_outcome(&paths, &outcome);
    }
    Ok(())
}

/// Keep completed queries (they are skipped anyway) and at most `limit`
/// pending ones.
fn limit_pending(queries: &mut Vec<Query>, index: &LedgerIndex, limit: usize) {
    let mut taken = 0;
    queries.retain(|q| {
        if index.is_complete(&q.key()) {
            return true;
        }
        taken += 1;
        taken <= limit
    });
}

/// Drive a progress bar from pipeline events until the run completes.
async fn render_progress(mut rx: EventReceiver) {
    let pb = ProgressBar::hidden();
    pb.set_style(
        ProgressStyle::default_bar()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event.event {
            PipelineEventKind::RunStarted { pending, .. } => {
                pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                pb.set_length(pending as u64);
                pb.enable_steady_tick(Duration::from_millis(100));
            }
            PipelineEventKind::QueryStarted { key, .. } => pb.set_message(key),
            PipelineEventKind::LoginAttempted { success: false, stage } => {
                pb.println(format!(
                    "  [!!] login failed at {}",
                    stage.as_deref().unwrap_or("unknown stage")
                ));
            }
            PipelineEventKind::QueryFinished {
                key, status, error, ..
            } => {
                if status == LedgerStatus::Failed {
                    pb.println(format!(
                        "  [!!] {key}: {}",
                        error.as_deref().unwrap_or("failed")
                    ));
                }
                pb.inc(1);
            }
            PipelineEventKind::RunComplete { .. } => break,
            _ => {}
        }
    }
    pb.finish_and_clear();
}

fn print_summary(run_id: &str, summary: &RunSummary) {
    println!("Run {run_id}");
    println!("  attempted:          {}", summary.attempted);
    println!("  skipped:            {}", summary.skipped);
    println!("  success:            {}", summary.succeeded);
    println!("  no_results:         {}", summary.no_results);
    println!("  no_download_button: {}", summary.no_download_button);
    println!("  failed:             {}", summary.failed);
}
