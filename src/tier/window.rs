//! Outcome aggregation for batches and tiers.
//!
//! [`BatchWindow`] collects the classified probes of one batch and condenses
//! them into a [`BatchSummary`] for the state machine. [`TierRecorder`] keeps
//! the running totals a finished [`TierResult`] reports.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::state::BatchSummary;
use crate::classify::ProbeCategory;
use crate::config::MAX_HEADER_SNAPSHOTS_PER_TIER;
use crate::headers::{declared_for_window, rate_limit_subset, DeclaredLimit, HeaderSnapshot};
use crate::models::{HeaderObservation, ProbeOutcome, TierOutcome, TierResult};
use crate::rotation::{EndpointUsage, LimitScope};

/// Classified probes of the batch in progress.
pub(crate) struct BatchWindow {
    window_seconds: u64,
    outcomes: Vec<ProbeOutcome>,
    fatal: Option<String>,
    cancelled: bool,
}

impl BatchWindow {
    pub(crate) fn new(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            outcomes: Vec::new(),
            fatal: None,
            cancelled: false,
        }
    }

    pub(crate) fn record(&mut self, outcome: ProbeOutcome) {
        self.outcomes.push(outcome);
    }

    /// Marks the batch fatal. Only the first detail is kept.
    pub(crate) fn mark_fatal(&mut self, detail: String) {
        self.fatal.get_or_insert(detail);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.fatal.is_some() || self.cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub(crate) fn summary(&self) -> BatchSummary {
        let count = |wanted: fn(ProbeCategory) -> bool| {
            self.outcomes.iter().filter(|o| wanted(o.category)).count() as u32
        };

        let signals: Vec<&ProbeOutcome> = self
            .outcomes
            .iter()
            .filter(|o| o.category.is_limit_signal())
            .collect();
        let retry_after = signals
            .iter()
            .filter_map(|o| o.retry_after_secs)
            .fold(None, |acc: Option<f64>, secs| Some(acc.map_or(secs, |a| a.max(secs))))
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

        BatchSummary {
            probes: self.outcomes.len() as u32,
            successes: count(|c| c == ProbeCategory::Success),
            limit_signals: signals.len() as u32,
            transient_failures: count(|c| c == ProbeCategory::Transient),
            fatal: self.fatal.clone(),
            cancelled: self.cancelled,
            declared_limit: self.declared_limit(),
            retry_after,
            reset_time: self.reset_time(&signals),
        }
    }

    /// The declared limit for this window, when every probe that declared one agrees.
    fn declared_limit(&self) -> Option<u64> {
        let mut declared = self
            .outcomes
            .iter()
            .filter(|o| !o.declared.is_empty())
            .map(|o| declared_for_window(&o.declared, self.window_seconds));
        let first = declared.next()??;
        declared
            .all(|value| value == Some(first))
            .then_some(first)
    }

    /// When the limit resets: from Retry-After on throttled probes if any,
    /// otherwise the latest reset declared for this window.
    fn reset_time(&self, signals: &[&ProbeOutcome]) -> Option<DateTime<Utc>> {
        let from_retry_after = signals
            .iter()
            .filter_map(|o| {
                let secs = o.retry_after_secs?;
                let delta = TimeDelta::try_milliseconds((secs * 1000.0) as i64)?;
                o.timestamp.checked_add_signed(delta)
            })
            .max();
        from_retry_after.or_else(|| {
            self.outcomes
                .iter()
                .flat_map(|o| o.declared.iter())
                .filter(|d| d.window.seconds() == Some(self.window_seconds))
                .filter_map(|d| d.reset_time)
                .max()
        })
    }
}

/// Running totals for one tier.
pub(crate) struct TierRecorder {
    probes: u64,
    retries: u64,
    errors: u64,
    latencies_ms: Vec<f64>,
    declared: Vec<DeclaredLimit>,
    snapshots: VecDeque<HeaderObservation>,
    consecutive_signals: u32,
}

impl TierRecorder {
    pub(crate) fn new() -> Self {
        Self {
            probes: 0,
            retries: 0,
            errors: 0,
            latencies_ms: Vec::new(),
            declared: Vec::new(),
            snapshots: VecDeque::new(),
            consecutive_signals: 0,
        }
    }

    /// Limit signals received back to back, across batches.
    pub(crate) fn consecutive_signals(&self) -> u32 {
        self.consecutive_signals
    }

    pub(crate) fn observe(&mut self, outcome: &ProbeOutcome, headers: &HeaderSnapshot) {
        self.probes += 1;
        self.retries += u64::from(outcome.retries);
        self.latencies_ms.push(outcome.latency_ms);

        match outcome.category {
            ProbeCategory::Success => self.consecutive_signals = 0,
            ProbeCategory::SoftSignal | ProbeCategory::HardSignal => {
                self.errors += 1;
                self.consecutive_signals += 1;
            }
            ProbeCategory::Transient => self.errors += 1,
            ProbeCategory::Fatal => {}
        }

        for declared in &outcome.declared {
            if !self
                .declared
                .iter()
                .any(|d| d.window == declared.window && d.limit == declared.limit)
            {
                self.declared.push(declared.clone());
            }
        }

        let subset = rate_limit_subset(headers);
        if !subset.is_empty() {
            if self.snapshots.len() >= MAX_HEADER_SNAPSHOTS_PER_TIER {
                self.snapshots.pop_front();
            }
            self.snapshots.push_back(HeaderObservation {
                observed_at: outcome.timestamp,
                endpoint: outcome.endpoint.clone(),
                status: outcome.status,
                headers: subset,
            });
        }
    }

    /// Builds the immutable result of the tier.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn finish(
        self,
        tier_name: &str,
        window_seconds: u64,
        safety_margin_percent: f64,
        outcome: TierOutcome,
        batches: u32,
        highest_clean_rate: Option<u32>,
        endpoint_usage: std::collections::BTreeMap<String, EndpointUsage>,
        limit_scope: LimitScope,
        started_at: DateTime<Utc>,
    ) -> TierResult {
        let (average, p95) = latency_stats(&self.latencies_ms);
        TierResult {
            tier_name: tier_name.to_string(),
            window_seconds,
            safety_margin_percent,
            outcome,
            probes_sent: self.probes,
            retries: self.retries,
            batches,
            error_rate: if self.probes == 0 {
                0.0
            } else {
                self.errors as f64 / self.probes as f64
            },
            average_latency_ms: average,
            p95_latency_ms: p95,
            highest_clean_rate,
            declared_limits: self.declared,
            header_snapshots: self.snapshots.into_iter().collect(),
            endpoint_usage,
            limit_scope,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Mean and 95th percentile (nearest rank) of the given latencies.
fn latency_stats(latencies_ms: &[f64]) -> (f64, f64) {
    if latencies_ms.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = latencies_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let average = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let p95 = sorted[rank.clamp(1, sorted.len()) - 1];
    (average, p95)
}
