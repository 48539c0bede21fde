// Copyright 2026 Landcomp Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use landcomp_runtime::cli::{self, GlobalArgs};

#[derive(Parser)]
#[command(
    name = "landcomp",
    about = "Landcomp: sold-land comps and price-per-acre benchmarks",
    version,
    after_help = "Run 'landcomp <command> --help' for details on each command."
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory (ledger, raw exports, output)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire exports for every pending query, then aggregate
    Run {
        /// Skip ingestion and aggregation after the batch
        #[arg(long)]
        no_aggregate: bool,
        /// Locations to process instead of the configured list. Can be repeated.
        #[arg(long = "location")]
        locations: Vec<String>,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        /// Attempt at most this many pending queries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the partitioned queries and which are already complete
    Plan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ingest raw exports and write the price-per-acre matrix
    Aggregate,
    /// Summarize the ledger
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let global = GlobalArgs {
        config: cli.config.clone(),
        data_dir: cli.data_dir.clone(),
    };

    let result = match cli.command {
        Commands::Run {
            no_aggregate,
            locations,
            headed,
            limit,
        } => {
            cli::run_cmd::run(
                &global,
                cli::run_cmd::RunOptions {
                    no_aggregate,
                    locations,
                    headed,
                    limit,
                },
            )
            .await
        }
        Commands::Plan { json } => cli::plan_cmd::run(&global, json),
        Commands::Aggregate => cli::aggregate_cmd::run(&global),
        Commands::Status { json } => cli::status::run(&global, json),
        Commands::Doctor => cli::doctor::run(&global).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "landcomp", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
