//! Ramp state machine.
//!
//! [`advance`] is a pure function from the current ramp state and the summary
//! of the batch just completed to the next transition. All scheduling and I/O
//! lives in the tester; everything decided here can be tested without time.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{DetectionSettings, TierDefinition};
use crate::models::{AbortReason, DetectionMethod, ExhaustionReason, TierOutcome};

/// Lifecycle of a tier test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPhase {
    Init,
    Ramping,
    LimitFound,
    Exhausted,
    Aborted,
    /// The result was materialized and the ceiling updated.
    Done,
}

/// Fixed parameters of one tier's ramp.
#[derive(Debug, Clone, PartialEq)]
pub struct RampParams {
    pub window_seconds: u64,
    pub start_rate: u32,
    pub max_rate: u32,
    /// Highest rate the ramp may use: `max_rate`, or lower under a ceiling.
    pub rate_cap: u32,
    /// Reported when the ramp ends cleanly at `rate_cap`.
    pub cap_reason: ExhaustionReason,
    pub increment: u32,
    pub success_threshold: f64,
    pub header_confirmation_batches: u32,
    pub safety_margin_percent: f64,
    pub max_test_duration: Duration,
}

impl RampParams {
    /// Derives ramp parameters for `tier`.
    ///
    /// # Arguments
    ///
    /// * `tier` - The tier definition (assumed valid)
    /// * `settings` - Run-wide detection settings
    /// * `ceiling_cap` - Cap in requests per window implied by a stricter tier
    pub fn new(tier: &TierDefinition, settings: &DetectionSettings, ceiling_cap: Option<u32>) -> Self {
        let (rate_cap, cap_reason) = match ceiling_cap {
            Some(cap) if cap < tier.max_rate => (cap.max(1), ExhaustionReason::CeilingCap),
            _ => (tier.max_rate, ExhaustionReason::RateCap),
        };
        Self {
            window_seconds: tier.window_seconds,
            start_rate: tier.start_rate.min(rate_cap).max(1),
            max_rate: tier.max_rate,
            rate_cap,
            cap_reason,
            increment: tier.increment.max(1),
            success_threshold: settings.success_threshold,
            header_confirmation_batches: settings.header_confirmation_batches.max(1),
            safety_margin_percent: tier.safety_margin_percent,
            max_test_duration: tier.max_test_duration(),
        }
    }

    /// Highest tolerated fraction of failed probes in a clean batch.
    pub fn max_error_rate(&self) -> f64 {
        1.0 - self.success_threshold
    }

    /// `limit` reduced by the safety margin.
    pub fn optimal_rate(&self, limit: u64) -> f64 {
        limit as f64 * (1.0 - self.safety_margin_percent / 100.0)
    }
}

/// Mutable ramp state carried from batch to batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RampState {
    pub phase: TierPhase,
    pub current_rate: u32,
    pub last_clean_rate: Option<u32>,
    pub batches: u32,
    /// Header-declared limit and how many consecutive batches agreed on it.
    pub header_streak: Option<(u64, u32)>,
}

impl RampState {
    pub fn new(params: &RampParams) -> Self {
        Self {
            phase: TierPhase::Init,
            current_rate: params.start_rate,
            last_clean_rate: None,
            batches: 0,
            header_streak: None,
        }
    }
}

/// What one batch produced, already classified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Probes that completed and were classified.
    pub probes: u32,
    pub successes: u32,
    pub limit_signals: u32,
    /// Transient failures left after the retry budget.
    pub transient_failures: u32,
    pub fatal: Option<String>,
    pub cancelled: bool,
    /// Limit declared for this tier's window, if every declaration agreed.
    pub declared_limit: Option<u64>,
    pub retry_after: Option<Duration>,
    pub reset_time: Option<DateTime<Utc>>,
}

impl BatchSummary {
    pub fn error_rate(&self) -> f64 {
        if self.probes == 0 {
            return 0.0;
        }
        f64::from(self.limit_signals + self.transient_failures) / f64::from(self.probes)
    }
}

/// Next step of the ramp.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Run another batch at `next_rate`.
    Continue { next_rate: u32 },
    /// The tier is finished.
    Finished(TierOutcome),
}

/// Advances the ramp by one completed batch.
///
/// Checks, in order: fatal or cancelled batch, error rate above the
/// threshold, a header-declared limit confirmed over enough batches, the time
/// budget, and the rate cap. Otherwise the rate grows by `increment`.
pub fn advance(
    params: &RampParams,
    state: &mut RampState,
    batch: &BatchSummary,
    elapsed: Duration,
) -> Transition {
    state.batches += 1;
    state.phase = TierPhase::Ramping;

    if let Some(detail) = &batch.fatal {
        return abort(
            state,
            AbortReason::Fatal {
                detail: detail.clone(),
            },
        );
    }
    if batch.cancelled {
        return abort(state, AbortReason::Cancelled);
    }

    if batch.probes > 0 && batch.error_rate() > params.max_error_rate() {
        let limit = state
            .last_clean_rate
            .map(u64::from)
            .unwrap_or_else(|| u64::from(batch.successes.max(1)));
        return limit_found(params, state, limit, DetectionMethod::ErrorRate, batch.reset_time);
    }

    match batch.declared_limit {
        Some(declared) => {
            let streak = match state.header_streak {
                Some((value, count)) if value == declared => count + 1,
                _ => 1,
            };
            state.header_streak = Some((declared, streak));
            if streak >= params.header_confirmation_batches {
                return limit_found(params, state, declared, DetectionMethod::Headers, batch.reset_time);
            }
        }
        None => state.header_streak = None,
    }

    if batch.probes > 0 {
        state.last_clean_rate = Some(state.current_rate);
    }

    if elapsed >= params.max_test_duration {
        return Transition::Finished(time_exhausted(params, state));
    }
    if state.current_rate >= params.rate_cap {
        state.phase = TierPhase::Exhausted;
        return Transition::Finished(TierOutcome::Exhausted {
            max_rate_reached: state.current_rate >= params.max_rate,
            reason: params.cap_reason,
            rate_reached: state.current_rate,
        });
    }

    let next_rate = state
        .current_rate
        .saturating_add(params.increment)
        .min(params.rate_cap);
    state.current_rate = next_rate;
    Transition::Continue { next_rate }
}

/// Ends the ramp because the time budget ran out.
pub fn time_exhausted(params: &RampParams, state: &mut RampState) -> TierOutcome {
    state.phase = TierPhase::Exhausted;
    TierOutcome::Exhausted {
        max_rate_reached: state.current_rate >= params.max_rate,
        reason: ExhaustionReason::TimeBudget,
        rate_reached: state.current_rate,
    }
}

/// Ends the ramp because the run was cancelled between batches.
pub fn cancelled(state: &mut RampState) -> TierOutcome {
    state.phase = TierPhase::Aborted;
    TierOutcome::Aborted {
        reason: AbortReason::Cancelled,
    }
}

fn abort(state: &mut RampState, reason: AbortReason) -> Transition {
    state.phase = TierPhase::Aborted;
    Transition::Finished(TierOutcome::Aborted { reason })
}

fn limit_found(
    params: &RampParams,
    state: &mut RampState,
    limit: u64,
    detected_via: DetectionMethod,
    reset_time: Option<DateTime<Utc>>,
) -> Transition {
    state.phase = TierPhase::LimitFound;
    Transition::Finished(TierOutcome::LimitFound {
        limit,
        window_seconds: params.window_seconds,
        detected_via,
        reset_time,
        optimal_rate: params.optimal_rate(limit),
    })
}

/// Probes to send in one batch so that `rate` per window is honoured.
///
/// A batch of length `batch_interval` carries `ceil(rate × batch / window)`
/// probes, and always at least one.
pub fn probes_per_batch(rate: u32, batch_interval: Duration, window: Duration) -> u32 {
    let window_secs = window.as_secs_f64();
    if window_secs <= 0.0 {
        return rate.max(1);
    }
    let exact = f64::from(rate) * batch_interval.as_secs_f64() / window_secs;
    // Absorb floating point noise so exact multiples do not round up.
    let probes = (exact - 1e-9).ceil();
    if probes >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        (probes as u32).max(1)
    }
}
