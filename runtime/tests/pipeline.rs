//! End-to-end acquisition runs against the scripted browser:
//! partition → ledger skip-check → capture → ledger → ingest → aggregate.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use landcomp::partition::partition_locations;
use landcomp::{
    aggregate, ingest_dir, CaptureMethod, Ledger, LedgerIndex, LedgerStatus, PriceRange, Query,
    SizeCategory, SizeRange,
};
use landcomp_runtime::capture::CaptureEngine;
use landcomp_runtime::cli::aggregate_cmd::aggregate_dir;
use landcomp_runtime::config::{Config, Credentials, DataPaths};
use landcomp_runtime::pipeline::Pipeline;
use landcomp_runtime::progress::{self, Emitter, PipelineEventKind};
use landcomp_runtime::renderer::Locator;
use landcomp_runtime::session::{ExportSelectors, LoginSelectors, SessionManager};
use landcomp_runtime::testing::{Effect, Script};
use landcomp_runtime::throttle::RetryPolicy;

const LOGIN_URL: &str = "https://src.test/login";
const TEMPLATE: &str =
    "https://src.test/{location}/sold?lot={min_acres}-{max_acres}&price={min_price}-{max_price}";

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn export() -> Locator {
    Locator::css("a#download-and-save")
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.source.login_url = LOGIN_URL.into();
    config.source.search_url_template = TEMPLATE.into();
    config.timeouts.navigation_ms = 1_000;
    config.timeouts.probe_poll_ms = 2;
    config.timeouts.login_settle_ms = 30;
    config.timeouts.download_ms = 30;
    config.timeouts.intercept_ms = 30;
    config.timeouts.replay_ms = 500;
    config.data_dir = Some(root.to_path_buf());
    config
}

/// Three queries per location: one capped small band, two for the 1-3 band.
fn queries(locations: &[&str]) -> Vec<Query> {
    let locations: Vec<String> = locations.iter().map(|l| l.to_string()).collect();
    let sizes = vec![
        SizeRange::new("0-0.25", 0.0, Some(0.25), Some(190_000)),
        SizeRange::new("1-3", 1.0, Some(3.0), None),
    ];
    let prices = vec![
        PriceRange::new("0-100k", 0, Some(100_000)),
        PriceRange::new("100k+", 100_000, None),
    ];
    partition_locations(&locations, &sizes, &prices)
}

fn pipeline(config: &Config, paths: &DataPaths, emitter: Emitter) -> Pipeline {
    paths.ensure().unwrap();
    let session = SessionManager::new(Credentials::new("agent@example.com", "s3cret"), LOGIN_URL)
        .with_selectors(LoginSelectors::default().with_uniform_timeout(ms(10)))
        .with_timing(1_000, ms(2), ms(30));
    let engine = CaptureEngine::standard(
        config,
        &paths.downloads,
        ExportSelectors::default().with_uniform_timeout(ms(10)),
    )
    .unwrap();
    Pipeline::new(
        Ledger::open(&paths.ledger).unwrap(),
        session,
        engine,
        config.search_template(),
        &paths.raw,
    )
    .with_retry(RetryPolicy {
        attempts: 3,
        base: ms(1),
    })
    .with_emitter(emitter)
}

/// Two listings per export, keyed by the page URL so every query's rows
/// are distinct.
fn csv_for(url: &str) -> Vec<u8> {
    let zip = url
        .trim_start_matches("https://src.test/")
        .split('/')
        .next()
        .unwrap_or_default();
    format!(
        "ADDRESS,PRICE,LOT SIZE,ZIP OR POSTAL CODE\n\
         \"{url} A\",100000,10000,{zip}\n\
         \"{url} B\",150000,10890,{zip}\n"
    )
    .into_bytes()
}

/// Every results page shows the export control; clicking it downloads.
fn source() -> Script {
    Script::new()
        .on_navigate(
            "https://src.test/",
            Effect::new().replace_page().show(export()),
        )
        .on_click(export(), Effect::new().download_with(csv_for))
}

fn csv_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "csv"))
        .count()
}

#[tokio::test]
async fn test_full_run_through_aggregation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["32541", "32550"]);
    assert_eq!(qs.len(), 6);

    let script = source();
    let mut ctx = script.context();
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;

    assert_eq!(summary.attempted, 6);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(summary.skipped, 0);
    assert_eq!(csv_files(&paths.raw), 6);
    assert_eq!(script.clicks().len(), 6);

    let index = LedgerIndex::load(&paths.ledger).unwrap();
    assert_eq!(index.summary().success, 6);
    let entries = landcomp::ledger::read_entries(&paths.ledger).unwrap();
    assert!(entries
        .iter()
        .all(|e| e.capture_method == Some(CaptureMethod::NativeDownload)));
    assert!(entries
        .iter()
        .all(|e| e.source_url.starts_with("https://src.test/") && e.filename.is_some()));

    let report = ingest_dir(&paths.raw).unwrap();
    assert_eq!(report.records.len(), 12);
    let matrix = aggregate(&report.records);
    assert_eq!(matrix.bucket_count(), 2);
    let bucket = matrix.get("32541", SizeCategory::UpToQuarter).unwrap();
    assert_eq!(bucket.count, 6);
    // Three at 435,600/acre and three at 600,000/acre.
    assert!((bucket.median - 517_800.0).abs() < 1e-6);
    assert!((bucket.min - 435_600.0).abs() < 1e-6);

    let outcome = aggregate_dir(&paths).unwrap();
    assert_eq!(outcome.records, 12);
    assert!(paths.matrix_json().exists());
    assert!(paths.matrix_csv().exists());
}

#[tokio::test]
async fn test_restart_only_processes_missing_queries() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["32541"]);
    let search = config.search_template();

    let script = source();
    let mut ctx = script.context();
    {
        // Interrupted after the first two queries.
        let mut p = pipeline(&config, &paths, Emitter::silent());
        let summary = p.run(ctx.as_mut(), &qs[..2]).await;
        assert_eq!(summary.succeeded, 2);
    }

    // A kill mid-write leaves a torn final line.
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .open(&paths.ledger)
        .unwrap();
    f.write_all(br#"{"timestamp":"2026-"#).unwrap();
    drop(f);

    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);

    let navigations = script.navigations();
    assert_eq!(navigations.len(), 3);
    assert_eq!(navigations[2], search.render(&qs[2]));

    // A third run has nothing left to do.
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(script.navigations().len(), 3);
}

#[tokio::test]
async fn test_navigation_exhaustion_fails_query_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["32541"]);

    let script = source().fail_navigations(3);
    let mut ctx = script.context();
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    let entries = landcomp::ledger::read_entries(&paths.ledger).unwrap();
    assert_eq!(entries[0].status, LedgerStatus::Failed);
    let error = entries[0].error.as_deref().unwrap();
    assert!(error.contains("navigation failed after 3 attempts"), "{error}");

    // The failed query is retried on the next run; successes are not.
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_empty_and_broken_pages_are_recorded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["99999", "77777", "32541"]);

    let script = source()
        .on_navigate(
            "/99999/",
            Effect::new()
                .replace_page()
                .show(Locator::content("No results")),
        )
        .on_navigate("/77777/", Effect::new().replace_page());
    let mut ctx = script.context();
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;

    assert_eq!(summary.no_results, 3);
    assert_eq!(summary.no_download_button, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(csv_files(&paths.raw), 3);
}

#[tokio::test]
async fn test_sign_in_wall_triggers_login_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["32541"]);

    let email = Locator::css("input[type='email']");
    let password = Locator::css("input[type='password']");
    let submit = Locator::css("button[type='submit']");
    let script = source()
        // The first results page is behind a sign-in wall.
        .on_navigate(
            "/32541/",
            Effect::new().replace_page().show(email.clone()).once(),
        )
        .on_navigate(
            LOGIN_URL,
            Effect::new()
                .replace_page()
                .show(email.clone())
                .show(Locator::text("Continue")),
        )
        .on_click(
            Locator::text("Continue"),
            Effect::new()
                .hide(email)
                .show(password)
                .show(submit.clone()),
        )
        .on_click(submit, Effect::new().replace_page());
    let mut ctx = script.context();

    let (tx, mut rx) = progress::channel();
    let mut p = pipeline(&config, &paths, Emitter::new(Some(tx), "run-test"));
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.succeeded, 3);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().all(|e| e.run_id == "run-test"));
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    let logins = events
        .iter()
        .filter(|e| matches!(e.event, PipelineEventKind::LoginAttempted { success: true, .. }))
        .count();
    assert_eq!(logins, 1);
    let finished = events
        .iter()
        .filter(|e| matches!(e.event, PipelineEventKind::QueryFinished { .. }))
        .count();
    assert_eq!(finished, 3);
    assert!(matches!(
        events.last().map(|e| &e.event),
        Some(PipelineEventKind::RunComplete { .. })
    ));
}

#[tokio::test]
async fn test_login_failure_fails_one_query_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let paths = config.data_paths(None);
    let qs = queries(&["32541"]);

    let script = source()
        // The first results page is behind a sign-in wall whose login page
        // never offers an email field.
        .on_navigate(
            "/32541/",
            Effect::new()
                .replace_page()
                .show(Locator::css("input[type='email']"))
                .once(),
        )
        .on_navigate(LOGIN_URL, Effect::new().replace_page());
    let mut ctx = script.context();

    let (tx, mut rx) = progress::channel();
    let mut p = pipeline(&config, &paths, Emitter::new(Some(tx), "run-test"));
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);

    let entries = landcomp::ledger::read_entries(&paths.ledger).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].status, LedgerStatus::Failed);
    let error = entries[0].error.as_deref().unwrap();
    assert!(error.contains("login failed at email_entry"), "{error}");
    assert!(entries[1..].iter().all(|e| e.status == LedgerStatus::Success));

    // Both login attempts were made and reported.
    let logins = script
        .navigations()
        .iter()
        .filter(|u| u.as_str() == LOGIN_URL)
        .count();
    assert_eq!(logins, 2);
    let mut failed_logins = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEventKind::LoginAttempted { success, stage } = event.event {
            failed_logins.push((success, stage));
        }
    }
    assert_eq!(
        failed_logins,
        vec![
            (false, Some("email_entry".to_string())),
            (false, Some("email_entry".to_string())),
        ]
    );

    // The failed key is retried next run.
    let mut p = pipeline(&config, &paths, Emitter::silent());
    let summary = p.run(ctx.as_mut(), &qs).await;
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
}
