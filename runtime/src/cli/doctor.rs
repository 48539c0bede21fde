//! Environment readiness check.

use anyhow::Result;

use super::GlobalArgs;
use crate::config::{Config, Credentials};
use crate::renderer::chromium::find_chromium;

/// Check Chromium, config, credentials, and the data directory.
pub async fn run(global: &GlobalArgs) -> Result<()> {
    println!("Landcomp Doctor");
    println!("===============");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let mut ready = true;

    let chromium = find_chromium();
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => {
            ready = false;
            println!("[!!] Chromium NOT found. Install Chrome or set LANDCOMP_CHROMIUM_PATH.");
        }
    }

    let config_path = global.config_path();
    let config = match Config::load(global.config.as_deref()) {
        Ok(config) => {
            if config_path.exists() {
                println!("[OK] Config: {}", config_path.display());
            } else {
                println!("[??] No config at {} (using defaults)", config_path.display());
            }
            Some(config)
        }
        Err(e) => {
            ready = false;
            println!("[!!] Config: {e}");
            None
        }
    };

    if let Some(config) = &config {
        match config.validate_for_run() {
            Ok(()) => match config.queries() {
                Ok(q) => println!(
                    "[OK] Source configured: {} locations, {} queries",
                    config.locations.len(),
                    q.len()
                ),
                Err(e) => {
                    ready = false;
                    println!("[!!] {e}");
                }
            },
            Err(e) => {
                ready = false;
                println!("[!!] {e}");
            }
        }

        match Credentials::resolve(config.credentials.as_ref()) {
            Ok(c) => println!("[OK] Credentials for account {}", c.account),
            Err(e) => {
                ready = false;
                println!("[!!] {e}");
            }
        }

        let paths = config.data_paths(global.data_dir.as_deref());
        match paths.ensure() {
            Ok(()) => println!("[OK] Data directory: {}", paths.root.display()),
            Err(e) => {
                ready = false;
                println!("[!!] Data directory {} not writable: {e}", paths.root.display());
            }
        }
    }

    println!();
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}
