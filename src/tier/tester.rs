//! Async driver for one tier's ramp.
//!
//! Each batch spreads its probes evenly over the batch interval, runs them
//! concurrently under the shared semaphore, classifies them as they complete
//! and hands the batch summary to [`advance`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::state::{
    advance, cancelled, probes_per_batch, time_exhausted, RampParams, RampState, TierPhase,
    Transition,
};
use super::window::{BatchWindow, TierRecorder};
use crate::classify::{ProbeCategory, RawOutcome, ResponseClassifier};
use crate::config::{DetectionSettings, RetryPolicy, TierDefinition};
use crate::detector::CrossTierCeiling;
use crate::error_handling::{DetectionError, FailureKind, ProbeStats, TransportFailure};
use crate::headers::{retry_after, HeaderLimitParser};
use crate::models::{ProbeOutcome, TierOutcome, TierResult};
use crate::probe::{probe_with_retry, ProbeAttempt, Prober};
use crate::rotation::EndpointRotator;

/// Everything a probe needs, shared by all probes of a site run.
#[derive(Clone)]
pub struct ProbeContext {
    pub prober: Arc<dyn Prober>,
    pub classifier: Arc<ResponseClassifier>,
    pub parser: Arc<HeaderLimitParser>,
    pub retry: RetryPolicy,
    /// Hard limit for a single attempt.
    pub timeout: Duration,
    pub semaphore: Arc<Semaphore>,
    pub stats: Arc<ProbeStats>,
}

/// A probe as it came back from its task, before classification.
struct Completed {
    endpoint: String,
    attempt: ProbeAttempt,
}

/// A finished tier plus what the detector needs to plan the next one.
#[derive(Debug, Clone)]
pub struct TierRun {
    pub result: TierResult,
    /// Longest Retry-After seen on the final batch.
    pub retry_after: Option<Duration>,
}

/// Ramps a single tier to a terminal outcome.
pub struct TierTester<'a> {
    ctx: &'a ProbeContext,
    settings: &'a DetectionSettings,
    cancel: &'a CancellationToken,
}

impl<'a> TierTester<'a> {
    pub fn new(
        ctx: &'a ProbeContext,
        settings: &'a DetectionSettings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            ctx,
            settings,
            cancel,
        }
    }

    /// Tests one tier and lowers `ceiling` if it finds a stricter limit.
    ///
    /// Probe failures never surface here; they end up in the returned result.
    ///
    /// # Arguments
    ///
    /// * `tier` - The tier to test
    /// * `rotator` - Endpoint selection for the site; its usage counters are reset
    /// * `ceiling` - The site's cross-tier ceiling
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::InvalidTier` when the tier definition is invalid.
    pub async fn run(
        &self,
        tier: &TierDefinition,
        rotator: &mut EndpointRotator,
        ceiling: &CrossTierCeiling,
    ) -> Result<TierRun, DetectionError> {
        tier.validate()?;

        let params = RampParams::new(tier, self.settings, ceiling.cap_for_window(tier.window_seconds));
        let mut state = RampState::new(&params);
        let mut recorder = TierRecorder::new();
        let mut retry_after = None;
        rotator.reset_usage();

        log::info!(
            "Testing tier '{}' ({}s window): start {} max {} step {}{}",
            tier.name,
            tier.window_seconds,
            params.start_rate,
            tier.max_rate,
            params.increment,
            if params.rate_cap < tier.max_rate {
                format!(", capped at {} by ceiling", params.rate_cap)
            } else {
                String::new()
            }
        );

        let started_at = Utc::now();
        let tier_start = Instant::now();
        let deadline = tier_start + params.max_test_duration;
        let batch_interval = tier.batch_interval();

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break cancelled(&mut state);
            }
            if Instant::now() >= deadline {
                break time_exhausted(&params, &mut state);
            }

            let batch_start = Instant::now();
            let batch = self
                .run_batch(
                    &params,
                    state.current_rate,
                    batch_start,
                    batch_interval,
                    deadline,
                    rotator,
                    &mut recorder,
                )
                .await;
            let summary = batch.summary();
            if summary.retry_after.is_some() {
                retry_after = summary.retry_after;
            }

            log::debug!(
                "Tier '{}' batch {}: rate {}/{}s, {} probes, {} signals, {} transient",
                tier.name,
                state.batches + 1,
                state.current_rate,
                tier.window_seconds,
                summary.probes,
                summary.limit_signals,
                summary.transient_failures
            );

            match advance(&params, &mut state, &summary, tier_start.elapsed()) {
                Transition::Finished(outcome) => break outcome,
                Transition::Continue { next_rate } => {
                    log::info!(
                        "Tier '{}': batch clean ({:.1}% errors), rate -> {}/{}s",
                        tier.name,
                        summary.error_rate() * 100.0,
                        next_rate,
                        tier.window_seconds
                    );
                    let resume_at = (batch_start + batch_interval).min(deadline);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break cancelled(&mut state),
                        _ = sleep_until(resume_at) => {}
                    }
                }
            }
        };

        log_outcome(&tier.name, &outcome);
        let result = recorder.finish(
            &tier.name,
            tier.window_seconds,
            tier.safety_margin_percent,
            outcome,
            state.batches,
            state.last_clean_rate,
            rotator.usage(),
            rotator.limit_scope(),
            started_at,
        );
        ceiling.observe(&result);
        state.phase = TierPhase::Done;

        Ok(TierRun {
            result,
            retry_after,
        })
    }

    /// Runs one batch and returns its probes.
    ///
    /// Stops early on a fatal probe or cancellation; probes still in flight
    /// are then aborted. No probe is scheduled past `deadline`.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        params: &RampParams,
        rate: u32,
        batch_start: Instant,
        batch_interval: Duration,
        deadline: Instant,
        rotator: &mut EndpointRotator,
        recorder: &mut TierRecorder,
    ) -> BatchWindow {
        let probes = probes_per_batch(rate, batch_interval, Duration::from_secs(params.window_seconds));
        let spacing = batch_interval / probes;
        let probe_cancel = self.cancel.child_token();
        let mut batch = BatchWindow::new(params.window_seconds);
        let mut in_flight = FuturesUnordered::new();
        let mut handles: Vec<AbortHandle> = Vec::new();
        let mut scheduled = 0u32;

        loop {
            let next_slot = (scheduled < probes)
                .then(|| batch_start + spacing * scheduled)
                .filter(|slot| *slot < deadline);
            if next_slot.is_none() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    batch.mark_cancelled();
                    break;
                }
                Some(completed) = in_flight.next(), if !in_flight.is_empty() => {
                    self.absorb(completed, &mut batch, recorder, rotator);
                    if batch.is_halted() {
                        break;
                    }
                }
                _ = sleep_until(next_slot.unwrap_or(deadline)), if next_slot.is_some() => {
                    let endpoint = rotator.next_endpoint().to_string();
                    let (handle, probe) = self.spawn_probe(endpoint, probe_cancel.clone());
                    handles.push(handle);
                    in_flight.push(probe);
                    scheduled += 1;
                }
            }
        }

        if batch.is_halted() {
            probe_cancel.cancel();
            for handle in &handles {
                handle.abort();
            }
            log::debug!(
                "Batch halted with {} of {} probes classified",
                batch.len(),
                scheduled
            );
        }
        batch
    }

    /// Starts one probe on its own task.
    ///
    /// The semaphore permit is taken inside the task so a slow server cannot
    /// stall the scheduler.
    fn spawn_probe(
        &self,
        endpoint: String,
        cancel: CancellationToken,
    ) -> (AbortHandle, impl Future<Output = Completed>) {
        let prober = Arc::clone(&self.ctx.prober);
        let classifier = Arc::clone(&self.ctx.classifier);
        let semaphore = Arc::clone(&self.ctx.semaphore);
        let retry = self.ctx.retry.clone();
        let timeout = self.ctx.timeout;
        let task_endpoint = endpoint.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            probe_with_retry(
                prober.as_ref(),
                &task_endpoint,
                &classifier,
                &retry,
                timeout,
                &cancel,
            )
            .await
        });
        let abort = handle.abort_handle();
        let completed = async move {
            let attempt = handle.await.unwrap_or_else(|e| panicked_probe(&e));
            Completed { endpoint, attempt }
        };
        (abort, completed)
    }

    /// Classifies a completed probe and records it everywhere it counts.
    fn absorb(
        &self,
        completed: Completed,
        batch: &mut BatchWindow,
        recorder: &mut TierRecorder,
        rotator: &mut EndpointRotator,
    ) {
        let Completed { endpoint, attempt } = completed;
        let ProbeAttempt { outcome, retries } = attempt;
        let category = self
            .ctx
            .classifier
            .classify(&outcome, recorder.consecutive_signals());

        let malformed_before = self.ctx.parser.malformed_count();
        let declared = self.ctx.parser.parse(&outcome.headers, outcome.observed_at);
        self.ctx
            .stats
            .add_malformed_headers(self.ctx.parser.malformed_count() - malformed_before);
        self.ctx.stats.increment_category(category);
        self.ctx.stats.add_retries(retries as usize);
        if let Some(failure) = &outcome.failure {
            self.ctx.stats.increment_failure(failure.kind);
        }

        if category == ProbeCategory::Fatal {
            batch.mark_fatal(fatal_detail(&outcome, &endpoint));
        }

        let probe = ProbeOutcome {
            timestamp: outcome.observed_at,
            endpoint,
            status: outcome.status,
            latency_ms: outcome.latency.as_secs_f64() * 1000.0,
            category,
            retries,
            declared,
            retry_after_secs: category
                .is_limit_signal()
                .then(|| retry_after(&outcome.headers, outcome.observed_at))
                .flatten()
                .map(|d| d.as_secs_f64()),
        };
        if probe.retry_after_secs.is_none()
            && category.is_limit_signal()
            && outcome.headers.contains_key("retry-after")
        {
            self.ctx.stats.add_malformed_headers(1);
        }
        rotator.record(&probe.endpoint, category);
        rotator.record_declared(&probe.endpoint, &probe.declared);
        if outcome.status.is_some() {
            rotator.record_latency(&probe.endpoint, outcome.latency);
        }
        recorder.observe(&probe, &outcome.headers);
        batch.record(probe);
    }
}

/// A probe task that panicked or was aborted counts as a transient failure.
fn panicked_probe(error: &JoinError) -> ProbeAttempt {
    ProbeAttempt {
        outcome: RawOutcome::failed(
            TransportFailure::new(FailureKind::Other, format!("probe task failed: {}", error)),
            Duration::ZERO,
        ),
        retries: 0,
    }
}

fn fatal_detail(outcome: &RawOutcome, endpoint: &str) -> String {
    match (&outcome.failure, outcome.status) {
        (Some(failure), _) => format!("{} ({})", failure, endpoint),
        (None, Some(status)) => format!("status {} from {}", status, endpoint),
        (None, None) => format!("no response from {}", endpoint),
    }
}

fn log_outcome(tier_name: &str, outcome: &TierOutcome) {
    match outcome {
        TierOutcome::LimitFound {
            limit,
            window_seconds,
            detected_via,
            optimal_rate,
            ..
        } => log::info!(
            "Tier '{}': limit found at {}/{}s via {} (optimal {:.1})",
            tier_name,
            limit,
            window_seconds,
            detected_via,
            optimal_rate
        ),
        TierOutcome::Exhausted {
            reason,
            rate_reached,
            ..
        } => log::info!(
            "Tier '{}': no limit found up to {} ({:?})",
            tier_name,
            rate_reached,
            reason
        ),
        TierOutcome::Aborted { reason } => {
            log::warn!("Tier '{}' aborted: {}", tier_name, reason)
        }
    }
}
