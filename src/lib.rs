//! rate_limit_detector library: multi-window rate limit discovery
//!
//! This library probes HTTP APIs with a slowly increasing request rate, one
//! time window (tier) at a time, and reports the limits each site enforces,
//! how confident the measurement is, and a safe sustained rate.
//!
//! # Example
//!
//! ```no_run
//! use rate_limit_detector::{run_detection, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     config_file: std::path::PathBuf::from("config.json"),
//!     no_ai: true,
//!     ..Default::default()
//! };
//!
//! let report = run_detection(config, CancellationToken::new()).await?;
//! for site in &report.sites {
//!     println!("{}: {:?}", site.site_name, site.profile.recommended_rate);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your application
//! or ensure you're calling library functions within an async context.

pub mod advisor;
mod app;
pub mod classify;
pub mod config;
pub mod detector;
pub mod error_handling;
pub mod headers;
pub mod initialization;
pub mod models;
pub mod probe;
pub mod rotation;
pub mod storage;
pub mod tier;

// Re-export public API
pub use app::{cancel_on_ctrl_c, print_report_summary};
pub use config::{Config, DetectorConfig, LogFormat, LogLevel};
pub use detector::MultiTierDetector;
pub use models::{DetectionReport, RateLimitProfile, SiteFailure, SiteReport};
pub use run::run_detection;

// Internal run module (drives every configured site)
mod run {
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use chrono::Utc;
    use futures::stream::FuturesUnordered;
    use futures::StreamExt;
    use log::{info, warn};
    use tokio_util::sync::CancellationToken;

    use crate::advisor::{recommend_or_fallback, Advisor, OpenRouterAdvisor};
    use crate::app::print_probe_statistics;
    use crate::config::{Config, DetectorConfig};
    use crate::detector::MultiTierDetector;
    use crate::error_handling::DetectionError;
    use crate::initialization::init_client;
    use crate::models::{DetectionReport, SiteFailure, SiteReport};
    use crate::probe::HttpProber;
    use crate::storage::JsonResultsStore;

    /// Applies command-line overrides on top of the configuration file.
    fn apply_overrides(detector_config: &mut DetectorConfig, config: &Config) {
        if config.stop_on_first_limit {
            detector_config.detection.stop_on_first_limit = true;
        }
        if config.no_ai {
            detector_config.advisor.enabled = false;
        }
        if let Some(dir) = &config.output_dir {
            detector_config.storage.output_dir = dir.clone();
        }
    }

    fn site_failure(name: &str, error: &DetectionError) -> SiteFailure {
        warn!("Detection failed for '{}': {}", name, error);
        SiteFailure {
            site_name: name.to_string(),
            error: error.to_string(),
        }
    }

    fn build_advisor(detector_config: &DetectorConfig) -> Option<OpenRouterAdvisor> {
        if !detector_config.advisor.enabled {
            info!("AI advisor disabled, using rule-based recommendations");
            return None;
        }
        match OpenRouterAdvisor::from_settings(&detector_config.advisor) {
            Ok(advisor) => Some(advisor),
            Err(e) => {
                warn!("{}. Using rule-based recommendations.", e);
                None
            }
        }
    }

    /// Runs detection for every selected site and saves the report.
    ///
    /// Sites are probed concurrently, each with its own detector, so one site's
    /// limits never slow another down. A site that cannot be probed at all is
    /// recorded as a failure; the other sites still complete.
    ///
    /// # Arguments
    ///
    /// * `config` - Command-line options (configuration file and overrides)
    /// * `cancel` - Stops probing early; partial results are still reported
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The configuration file cannot be loaded or is invalid
    /// - A `--site` name is not in the configuration
    /// - The HTTP client cannot be built
    /// - The results file cannot be written
    pub async fn run_detection(
        config: Config,
        cancel: CancellationToken,
    ) -> Result<DetectionReport> {
        let mut detector_config = DetectorConfig::load(&config.config_file)
            .with_context(|| format!("Failed to load {}", config.config_file.display()))?;
        apply_overrides(&mut detector_config, &config);

        let sites = detector_config
            .select_sites(&config.sites)
            .context("Failed to select sites")?;
        let client =
            init_client(&detector_config.network).context("Failed to initialize HTTP client")?;

        let started_at = Utc::now();
        let start_time = std::time::Instant::now();
        info!(
            "Testing {} site{} across {} tier{}",
            sites.len(),
            if sites.len() == 1 { "" } else { "s" },
            detector_config.tiers.len(),
            if detector_config.tiers.len() == 1 { "" } else { "s" }
        );

        let tiers = detector_config.tiers.as_slice();
        let mut tasks = FuturesUnordered::new();
        let mut failures = Vec::new();
        for (name, site) in sites {
            let prober = match HttpProber::new(client.clone(), site) {
                Ok(prober) => prober,
                Err(e) => {
                    failures.push(site_failure(name, &e));
                    continue;
                }
            };
            let detector = MultiTierDetector::new(
                Arc::new(prober),
                detector_config.detection.clone(),
                detector_config.retry.clone(),
                detector_config.network.timeout(),
            )
            .with_cancellation(cancel.clone());
            tasks.push(async move {
                let result = detector.detect(name, site, tiers).await;
                info!("Probe statistics for '{}':", name);
                print_probe_statistics(&detector.stats());
                (name, result)
            });
        }

        let mut profiles = Vec::new();
        while let Some((name, result)) = tasks.next().await {
            match result {
                Ok(profile) => profiles.push(profile),
                Err(e) => failures.push(site_failure(name, &e)),
            }
        }
        profiles.sort_by(|a, b| a.site_name.cmp(&b.site_name));
        failures.sort_by(|a, b| a.site_name.cmp(&b.site_name));

        let advisor = build_advisor(&detector_config);
        let mut reports = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let recommendation = if cancel.is_cancelled() {
                None
            } else {
                Some(
                    recommend_or_fallback(
                        advisor.as_ref().map(|a| a as &dyn Advisor),
                        &profile,
                    )
                    .await,
                )
            };
            reports.push(SiteReport {
                site_name: profile.site_name.clone(),
                profile,
                recommendation,
            });
        }

        let mut report = DetectionReport {
            started_at,
            sites: reports,
            failures,
            output_path: None,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        };

        if detector_config.storage.save_results {
            let store = JsonResultsStore::from_settings(&detector_config.storage);
            let path = store.save(&report).context("Failed to save results")?;
            report.output_path = Some(path);
        }

        Ok(report)
    }
}
