//! Bounded retry of transient probe failures.
//!
//! Retries are counted explicitly: a probe makes at most
//! `1 + max_retries` attempts, waiting `base × multiplier^n` (capped, with
//! optional jitter) between them. Limit signals are never retried here; they
//! are the measurement.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Prober;
use crate::classify::{RawOutcome, ResponseClassifier};
use crate::config::RetryPolicy;
use crate::error_handling::{FailureKind, TransportFailure};

/// Final outcome of a probe together with how many retries it took.
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub outcome: RawOutcome,
    pub retries: u32,
}

/// Iterator over the delays of a retry policy. Yields `max_retries` items.
///
/// `tokio_retry::strategy::ExponentialBackoff` only takes integer factors, so
/// the fractional `backoff_multiplier` is applied by hand; only jitter comes
/// from `tokio_retry`.
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetrySchedule {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            policy: policy.clone(),
            attempt: 0,
        }
    }
}

impl Iterator for RetrySchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.backoff_delay(self.attempt);
        self.attempt += 1;
        Some(if self.policy.jitter {
            tokio_retry::strategy::jitter(delay)
        } else {
            delay
        })
    }
}

/// Runs a single attempt under a hard timeout.
///
/// The prober's own client timeout normally fires first; this guards against
/// probers that never return.
pub async fn attempt_once(prober: &dyn Prober, endpoint: &str, timeout: Duration) -> RawOutcome {
    match tokio::time::timeout(timeout, prober.probe(endpoint)).await {
        Ok(outcome) => outcome,
        Err(_) => RawOutcome::failed(
            TransportFailure::new(
                FailureKind::Timeout,
                format!("no response within {:?}", timeout),
            ),
            timeout,
        ),
    }
}

/// Probes `endpoint`, retrying transient outcomes per `policy`.
///
/// Returns the first non-transient outcome, or the last transient one once the
/// retry budget is spent or `cancel` fires during a backoff.
///
/// # Arguments
///
/// * `prober` - Transport used for every attempt
/// * `endpoint` - Endpoint path to request
/// * `classifier` - Decides which outcomes are transient
/// * `policy` - Retry budget and backoff shape
/// * `timeout` - Hard limit for each individual attempt
/// * `cancel` - Aborts pending backoff sleeps
pub async fn probe_with_retry(
    prober: &dyn Prober,
    endpoint: &str,
    classifier: &ResponseClassifier,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeAttempt {
    let mut delays = RetrySchedule::new(policy);
    let mut retries = 0;
    loop {
        let outcome = attempt_once(prober, endpoint, timeout).await;
        if !classifier.is_transient(&outcome) {
            return ProbeAttempt { outcome, retries };
        }
        let Some(delay) = delays.next() else {
            log::debug!(
                "Giving up on {} after {} retries (status {:?})",
                endpoint,
                retries,
                outcome.status
            );
            return ProbeAttempt { outcome, retries };
        };

        log::debug!(
            "Transient result from {} (status {:?}), retrying in {:?}",
            endpoint,
            outcome.status,
            delay
        );
        tokio::select! {
            _ = cancel.cancelled() => return ProbeAttempt { outcome, retries },
            _ = tokio::time::sleep(delay) => {}
        }
        retries += 1;
    }
}
