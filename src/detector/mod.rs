//! Multi-tier detection for one site.
//!
//! [`MultiTierDetector::detect`] runs a pre-flight probe, then tests every tier
//! in ascending window order. Each tier starts under the ceiling left by the
//! tiers before it. Once all tiers resolve, the results are reconciled against
//! the declared limits and condensed into a [`RateLimitProfile`].

mod ceiling;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use ceiling::CrossTierCeiling;
pub use reconcile::{consistency_warnings, most_restrictive, recommended_rate, reconcile};

use crate::classify::{ProbeCategory, ResponseClassifier};
use crate::config::{DetectionSettings, RetryPolicy, TargetSite, TierDefinition};
use crate::error_handling::{DetectionError, ProbeStats};
use crate::headers::{DeclaredLimit, HeaderLimitParser};
use crate::initialization::init_semaphore;
use crate::models::{
    AbortReason, DetectionMethod, RateLimitProfile, RunStatus, TierOutcome, TierResult,
};
use crate::probe::{probe_with_retry, Prober};
use crate::rotation::EndpointRotator;
use crate::tier::{ProbeContext, TierTester};

/// What the pre-flight probe established.
enum Preflight {
    /// The site answered; carries declared limits and the requests it took.
    Ready(Vec<DeclaredLimit>, u64),
    /// The probes themselves are invalid; every tier is aborted.
    Fatal(String, u64),
    Cancelled(u64),
}

/// Discovers the rate limits of one site across several windows.
pub struct MultiTierDetector {
    ctx: ProbeContext,
    settings: DetectionSettings,
    cancel: CancellationToken,
    rotation_seed: Option<u64>,
}

impl MultiTierDetector {
    /// Creates a detector that probes through `prober`.
    ///
    /// # Arguments
    ///
    /// * `prober` - Transport for all probes of this detector
    /// * `settings` - Ramp, classification and rotation settings
    /// * `retry` - Retry policy for transient failures
    /// * `timeout` - Hard limit for each probe attempt
    pub fn new(
        prober: Arc<dyn Prober>,
        settings: DetectionSettings,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let classifier = ResponseClassifier::new(
            settings.rate_limit_status_codes.clone(),
            settings.consecutive_soft_signal_threshold,
        );
        let ctx = ProbeContext {
            prober,
            classifier: Arc::new(classifier),
            parser: Arc::new(HeaderLimitParser::new()),
            retry,
            timeout,
            semaphore: init_semaphore(settings.max_concurrent_requests),
            stats: Arc::new(ProbeStats::new()),
        };
        Self {
            ctx,
            settings,
            cancel: CancellationToken::new(),
            rotation_seed: None,
        }
    }

    /// Stops detection when `cancel` fires. In-progress tiers are reported as cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Makes endpoint rotation reproducible.
    pub fn with_rotation_seed(mut self, seed: u64) -> Self {
        self.rotation_seed = Some(seed);
        self
    }

    /// Probe counters accumulated over every `detect` call.
    pub fn stats(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Detects the limits of `site` for every tier.
    ///
    /// Tiers are tested one after another, shortest window first. A fatal probe
    /// result aborts the rest of the site; cancellation marks the remaining
    /// tiers as cancelled. Either way a partial profile is returned.
    ///
    /// # Arguments
    ///
    /// * `site_name` - Name used in logs and the profile
    /// * `site` - Base URL and endpoints to probe
    /// * `tiers` - Tiers to test, in any order
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::InvalidTier` for an invalid tier,
    /// `DetectionError::NoEndpoints` for a site without endpoints, and
    /// `DetectionError::Unreachable` when the pre-flight probe never gets an answer.
    pub async fn detect(
        &self,
        site_name: &str,
        site: &TargetSite,
        tiers: &[TierDefinition],
    ) -> Result<RateLimitProfile, DetectionError> {
        for tier in tiers {
            tier.validate()?;
        }
        let mut tiers = tiers.to_vec();
        tiers.sort_by_key(|tier| tier.window_seconds);

        let mut rotator = EndpointRotator::new(site_name, &site.endpoints, &self.settings.rotation)?;
        if let Some(seed) = self.rotation_seed {
            rotator = rotator.with_seed(seed);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        log::info!(
            "Detecting rate limits for '{}' ({}) over {} tiers",
            site_name,
            site.base_url,
            tiers.len()
        );

        let first_endpoint = rotator.endpoints().first().cloned().unwrap_or_default();
        let (preflight_limits, preflight_requests, results) =
            match self.preflight(site_name, &first_endpoint).await? {
                Preflight::Ready(limits, requests) => {
                    let results = self.run_tiers(&tiers, &mut rotator).await?;
                    (limits, requests, results)
                }
                Preflight::Fatal(detail, requests) => {
                    let reason = AbortReason::Fatal {
                        detail: format!("preflight: {}", detail),
                    };
                    (Vec::new(), requests, not_run_all(&tiers, &reason))
                }
                Preflight::Cancelled(requests) => {
                    (Vec::new(), requests, not_run_all(&tiers, &AbortReason::Cancelled))
                }
            };

        let reconciliation: Vec<_> = results
            .iter()
            .map(|tier| reconcile(tier, &preflight_limits))
            .collect();
        let profile = RateLimitProfile {
            site_name: site_name.to_string(),
            base_url: site.base_url.clone(),
            run_status: run_status(&results),
            most_restrictive_tier: most_restrictive(&results),
            recommended_rate: recommended_rate(&results, &reconciliation),
            consistency_warnings: consistency_warnings(&results, &reconciliation),
            total_requests_sent: preflight_requests
                + results
                    .iter()
                    .map(|tier| tier.probes_sent + tier.retries)
                    .sum::<u64>(),
            total_duration_seconds: clock.elapsed().as_secs_f64(),
            endpoints_tested: rotator.endpoints().to_vec(),
            preflight_limits,
            reconciliation,
            tiers: results,
            started_at,
            finished_at: Utc::now(),
        };

        for warning in &profile.consistency_warnings {
            log::warn!("{}: {}", site_name, warning);
        }
        log::info!(
            "Finished '{}': {:?}, {} of {} tiers found a limit, {} requests",
            site_name,
            profile.run_status,
            profile.limits_found(),
            profile.tiers.len(),
            profile.total_requests_sent
        );
        Ok(profile)
    }

    /// Probes the first endpoint once, with retries, before any tier runs.
    async fn preflight(&self, site_name: &str, endpoint: &str) -> Result<Preflight, DetectionError> {
        if self.cancel.is_cancelled() {
            return Ok(Preflight::Cancelled(0));
        }

        let attempt = probe_with_retry(
            self.ctx.prober.as_ref(),
            endpoint,
            &self.ctx.classifier,
            &self.ctx.retry,
            self.ctx.timeout,
            &self.cancel,
        )
        .await;
        let requests = 1 + u64::from(attempt.retries);
        let outcome = attempt.outcome;
        let category = self.ctx.classifier.classify(&outcome, 0);
        self.ctx.stats.increment_category(category);
        self.ctx.stats.add_retries(attempt.retries as usize);
        if let Some(failure) = &outcome.failure {
            self.ctx.stats.increment_failure(failure.kind);
        }

        if self.cancel.is_cancelled() {
            return Ok(Preflight::Cancelled(requests));
        }

        let detail = || match (&outcome.failure, outcome.status) {
            (Some(failure), _) => failure.to_string(),
            (None, Some(status)) => format!("status {} from {}", status, endpoint),
            (None, None) => format!("no response from {}", endpoint),
        };
        match category {
            ProbeCategory::Transient => Err(DetectionError::Unreachable {
                site: site_name.to_string(),
                detail: detail(),
            }),
            ProbeCategory::Fatal => {
                log::error!("Pre-flight probe for '{}' failed: {}", site_name, detail());
                Ok(Preflight::Fatal(detail(), requests))
            }
            ProbeCategory::Success | ProbeCategory::SoftSignal | ProbeCategory::HardSignal => {
                if category.is_limit_signal() {
                    log::warn!(
                        "'{}' is already throttling ({}); results may be pessimistic",
                        site_name,
                        detail()
                    );
                }
                let limits = self.ctx.parser.parse(&outcome.headers, outcome.observed_at);
                for declared in &limits {
                    log::info!(
                        "'{}' declares {} requests per {:?} ({})",
                        site_name,
                        declared.limit,
                        declared.window,
                        declared.source
                    );
                }
                Ok(Preflight::Ready(limits, requests))
            }
        }
    }

    /// Tests `tiers` in order, stopping or skipping per the outcome of each.
    async fn run_tiers(
        &self,
        tiers: &[TierDefinition],
        rotator: &mut EndpointRotator,
    ) -> Result<Vec<TierResult>, DetectionError> {
        let ceiling = CrossTierCeiling::new();
        let tester = TierTester::new(&self.ctx, &self.settings, &self.cancel);
        let mut results = Vec::with_capacity(tiers.len());
        let mut halted: Option<AbortReason> = None;

        for (index, tier) in tiers.iter().enumerate() {
            if halted.is_none() && self.cancel.is_cancelled() {
                halted = Some(AbortReason::Cancelled);
            }
            if let Some(reason) = &halted {
                log::info!("Tier '{}' not tested: {}", tier.name, reason);
                results.push(TierResult::not_run(
                    &tier.name,
                    tier.window_seconds,
                    tier.safety_margin_percent,
                    reason.clone(),
                ));
                continue;
            }

            let run = tester.run(tier, rotator, &ceiling).await?;
            let more_tiers = index + 1 < tiers.len();
            match &run.result.outcome {
                TierOutcome::Aborted {
                    reason: AbortReason::Cancelled,
                } => halted = Some(AbortReason::Cancelled),
                TierOutcome::Aborted { .. } => {
                    halted = Some(AbortReason::SiteAborted {
                        tier: tier.name.clone(),
                    })
                }
                TierOutcome::LimitFound { detected_via, .. } => {
                    if self.settings.stop_on_first_limit {
                        halted = Some(AbortReason::Skipped);
                    } else if *detected_via == DetectionMethod::ErrorRate && more_tiers {
                        self.cool_down(run.retry_after).await;
                    }
                }
                TierOutcome::Exhausted { .. } => {}
            }
            results.push(run.result);
        }
        Ok(results)
    }

    /// Waits out a provoked limit before the next tier. Returns early on cancellation.
    async fn cool_down(&self, retry_after: Option<Duration>) {
        let wait = self.settings.cooldown(retry_after);
        if wait.is_zero() {
            return;
        }
        log::info!("Cooling down for {:?} before the next tier", wait);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

fn not_run_all(tiers: &[TierDefinition], reason: &AbortReason) -> Vec<TierResult> {
    tiers
        .iter()
        .map(|tier| {
            TierResult::not_run(
                &tier.name,
                tier.window_seconds,
                tier.safety_margin_percent,
                reason.clone(),
            )
        })
        .collect()
}

/// Overall status: aborted if any tier hit a fatal error or was cancelled,
/// determined if any found a limit, exhausted otherwise.
fn run_status(results: &[TierResult]) -> RunStatus {
    let halted = results
        .iter()
        .filter_map(|tier| tier.outcome.abort_reason())
        .find(|reason| matches!(reason, AbortReason::Fatal { .. } | AbortReason::Cancelled));
    if let Some(reason) = halted {
        return RunStatus::Aborted {
            reason: reason.to_string(),
        };
    }
    if results.iter().any(|tier| tier.outcome.is_limit_found()) {
        RunStatus::Determined
    } else {
        RunStatus::Exhausted
    }
}
