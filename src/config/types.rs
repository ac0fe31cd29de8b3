//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing.
//! Detection settings themselves live in the JSON configuration file (see
//! [`crate::config::DetectorConfig`]); the CLI only points at that file and
//! overrides a handful of run-level switches.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Command-line options.
///
/// # Examples
///
/// ```bash
/// # Probe every site in the configuration file
/// rate_limit_detector config.json
///
/// # Only one site, JSON logs, no AI advisor
/// rate_limit_detector config.json --site github --log-format json --no-ai
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rate_limit_detector",
    about = "Discovers multi-window rate limits of HTTP APIs by ramping probe traffic."
)]
pub struct Config {
    /// JSON configuration file describing target sites and tiers
    #[arg(value_parser)]
    pub config_file: PathBuf,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Only test the named site (repeatable). Defaults to every configured site.
    #[arg(long = "site")]
    pub sites: Vec<String>,

    /// Directory for the results file (overrides the configuration file)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Skip the AI advisor and use rule-based recommendations only
    #[arg(long)]
    pub no_ai: bool,

    /// Stop testing a site's remaining tiers once any tier finds a limit
    #[arg(long)]
    pub stop_on_first_limit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("config.json"),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            sites: Vec::new(),
            output_dir: None,
            no_ai: false,
            stop_on_first_limit: false,
        }
    }
}
