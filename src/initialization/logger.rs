//! Logger initialization.
//!
//! Log lines are tagged with the detection component that emitted them
//! (`detector`, `tier`, `probe`, ...) rather than the full module path, so a
//! run reads as the sequence of ramp, ceiling and advisor decisions it made.

use std::io::Write;

use crate::config::LogFormat;
use crate::error_handling::InitializationError;
use colored::*;
use log::LevelFilter;

const CRATE_TARGET: &str = "rate_limit_detector";

/// Initializes the logger with the specified level and format.
///
/// `RUST_LOG` is read first; `level` then overrides it for this crate, so
/// `RUST_LOG=reqwest=debug` still works alongside `--log-level`.
///
/// # Errors
///
/// Returns `InitializationError::LoggerError` if a logger is already installed.
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    colored::control::set_override(format == LogFormat::Plain);

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("hyper_util", LevelFilter::Info);
    // httptest logs every matched request at debug
    builder.filter_module("httptest", LevelFilter::Warn);
    builder.filter_module(CRATE_TARGET, level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json_line(
                    chrono::Utc::now().timestamp_millis(),
                    record.level(),
                    record.target(),
                    &record.args().to_string(),
                );
                writeln!(buf, "{}", line)
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                let level = record.level();
                let colored_level = match level {
                    log::Level::Error => level.to_string().red().bold(),
                    log::Level::Warn => level.to_string().yellow(),
                    log::Level::Info => level.to_string().green(),
                    log::Level::Debug => level.to_string().blue(),
                    log::Level::Trace => level.to_string().purple(),
                };

                writeln!(
                    buf,
                    "{} {:>5} [{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f").to_string().dimmed(),
                    colored_level,
                    component(record.target()).cyan(),
                    record.args()
                )
            });
        }
    }

    builder.try_init().map_err(InitializationError::from)?;

    Ok(())
}

/// Short component name for a log target.
///
/// Targets inside this crate collapse to their top-level module
/// (`rate_limit_detector::tier::tester` becomes `tier`); the crate root is
/// `run`. Targets from other crates keep their own top-level name.
fn component(target: &str) -> &str {
    match target.strip_prefix(CRATE_TARGET) {
        Some("") => "run",
        Some(rest) => rest
            .trim_start_matches("::")
            .split("::")
            .next()
            .filter(|module| !module.is_empty())
            .unwrap_or("run"),
        None => target.split("::").next().unwrap_or(target),
    }
}

/// One structured log line.
fn json_line(timestamp_ms: i64, level: log::Level, target: &str, message: &str) -> String {
    serde_json::json!({
        "ts": timestamp_ms,
        "level": level.as_str(),
        "component": component(target),
        "target": target,
        "msg": message,
    })
    .to_string()
}
