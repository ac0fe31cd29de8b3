//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `rate_limit_detector` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - Ctrl-C handling and the final summary
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;

use rate_limit_detector::initialization::init_logger_with;
use rate_limit_detector::{cancel_on_ctrl_c, print_report_summary, run_detection, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    // Credentials referenced as ${NAME} in the configuration usually live there
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let config = Config::parse();

    let log_level = config.log_level.clone();
    let log_format = config.log_format.clone();
    init_logger_with(log_level.into(), log_format).context("Failed to initialize logger")?;

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());

    let result = run_detection(config, cancel.clone()).await;
    cancel.cancel();
    let _ = watcher.await;

    match result {
        Ok(report) => {
            print_report_summary(&report);
            if !report.failures.is_empty() && report.sites.is_empty() {
                process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("rate_limit_detector error: {:#}", e);
            process::exit(1);
        }
    }
}
