//! Probe response classification.
//!
//! Every probe ends in exactly one [`ProbeCategory`]. The category drives both
//! the retry loop (only transient results are retried) and the ramp (limit
//! signals and exhausted transients count toward a batch's error rate, a fatal
//! result aborts the tier).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

use crate::config::HTTP_STATUS_SERVICE_UNAVAILABLE;
use crate::error_handling::TransportFailure;
use crate::headers::{has_retry_metadata, HeaderSnapshot};

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeCategory {
    /// The request was served.
    Success,
    /// Throttled, and the server said when to come back.
    SoftSignal,
    /// Throttled without retry metadata, or throttled repeatedly.
    HardSignal,
    /// Network trouble or a server error; worth retrying.
    Transient,
    /// Retrying cannot help (authentication, bad request, unbuildable URL).
    Fatal,
}

impl ProbeCategory {
    /// Returns true for both soft and hard limit signals.
    pub fn is_limit_signal(self) -> bool {
        matches!(self, ProbeCategory::SoftSignal | ProbeCategory::HardSignal)
    }
}

/// What a prober observed for one attempt, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    /// HTTP status, absent when the request failed below HTTP.
    pub status: Option<u16>,
    pub headers: HeaderSnapshot,
    pub latency: Duration,
    pub failure: Option<TransportFailure>,
    pub observed_at: DateTime<Utc>,
}

impl RawOutcome {
    /// An outcome carrying an HTTP response.
    pub fn response(status: u16, headers: HeaderSnapshot, latency: Duration) -> Self {
        Self {
            status: Some(status),
            headers,
            latency,
            failure: None,
            observed_at: Utc::now(),
        }
    }

    /// An outcome for a request that never produced a response.
    pub fn failed(failure: TransportFailure, latency: Duration) -> Self {
        Self {
            status: None,
            headers: HeaderSnapshot::new(),
            latency,
            failure: Some(failure),
            observed_at: Utc::now(),
        }
    }
}

/// Maps raw outcomes to probe categories.
///
/// A status in the configured rate-limit set, or 503, is a limit signal. It is
/// soft when the response carries a parseable Retry-After or reset header and
/// hard otherwise. Once `consecutive_soft_threshold` limit signals arrived in a
/// row, further ones are hard regardless of headers.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    rate_limit_codes: Vec<u16>,
    consecutive_soft_threshold: u32,
}

impl ResponseClassifier {
    pub fn new(rate_limit_codes: Vec<u16>, consecutive_soft_threshold: u32) -> Self {
        Self {
            rate_limit_codes,
            consecutive_soft_threshold,
        }
    }

    fn is_limit_status(&self, status: u16) -> bool {
        status == HTTP_STATUS_SERVICE_UNAVAILABLE || self.rate_limit_codes.contains(&status)
    }

    /// Classifies one outcome.
    ///
    /// # Arguments
    ///
    /// * `outcome` - The observed response or transport failure
    /// * `consecutive_signals` - Limit signals received back to back before this one
    pub fn classify(&self, outcome: &RawOutcome, consecutive_signals: u32) -> ProbeCategory {
        if let Some(failure) = &outcome.failure {
            return if failure.kind.is_fatal() {
                ProbeCategory::Fatal
            } else {
                ProbeCategory::Transient
            };
        }
        let Some(status) = outcome.status else {
            return ProbeCategory::Transient;
        };

        if self.is_limit_status(status) {
            let soft = consecutive_signals < self.consecutive_soft_threshold
                && has_retry_metadata(&outcome.headers, outcome.observed_at);
            return if soft {
                ProbeCategory::SoftSignal
            } else {
                ProbeCategory::HardSignal
            };
        }

        match status {
            200..=299 => ProbeCategory::Success,
            400..=499 => ProbeCategory::Fatal,
            500..=599 => ProbeCategory::Transient,
            // Informational and redirect statuses reaching us mean the request was served.
            _ => ProbeCategory::Success,
        }
    }

    /// Returns true when the outcome should be retried.
    pub fn is_transient(&self, outcome: &RawOutcome) -> bool {
        self.classify(outcome, 0) == ProbeCategory::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::FailureKind;

    fn classifier() -> ResponseClassifier {
        ResponseClassifier::new(vec![429, 420], 3)
    }

    fn status(code: u16, headers: &[(&str, &str)]) -> RawOutcome {
        RawOutcome::response(
            code,
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_success_statuses() {
        let c = classifier();
        for code in [200, 201, 204, 299, 304] {
            assert_eq!(c.classify(&status(code, &[]), 0), ProbeCategory::Success, "{}", code);
        }
    }

    #[test]
    fn test_429_with_retry_after_is_soft() {
        let c = classifier();
        let outcome = status(429, &[("retry-after", "30")]);
        assert_eq!(c.classify(&outcome, 0), ProbeCategory::SoftSignal);
    }

    #[test]
    fn test_429_with_reset_header_is_soft() {
        let c = classifier();
        let outcome = status(420, &[("x-ratelimit-reset", "1709294400")]);
        assert_eq!(c.classify(&outcome, 0), ProbeCategory::SoftSignal);
    }

    #[test]
    fn test_429_without_metadata_is_hard() {
        let c = classifier();
        assert_eq!(c.classify(&status(429, &[]), 0), ProbeCategory::HardSignal);
        assert_eq!(
            c.classify(&status(429, &[("retry-after", "soon")]), 0),
            ProbeCategory::HardSignal
        );
    }

    #[test]
    fn test_429_with_oversized_retry_after_is_hard() {
        let c = classifier();
        let outcome = status(429, &[("retry-after", "1e20")]);
        assert_eq!(c.classify(&outcome, 0), ProbeCategory::HardSignal);
    }

    #[test]
    fn test_503_is_always_a_limit_signal() {
        let c = ResponseClassifier::new(vec![], 3);
        assert_eq!(c.classify(&status(503, &[]), 0), ProbeCategory::HardSignal);
        assert_eq!(
            c.classify(&status(503, &[("retry-after", "5")]), 0),
            ProbeCategory::SoftSignal
        );
    }

    #[test]
    fn test_repeated_soft_signals_escalate() {
        let c = classifier();
        let outcome = status(429, &[("retry-after", "1")]);
        assert_eq!(c.classify(&outcome, 2), ProbeCategory::SoftSignal);
        assert_eq!(c.classify(&outcome, 3), ProbeCategory::HardSignal);
        assert_eq!(c.classify(&outcome, 10), ProbeCategory::HardSignal);
    }

    #[test]
    fn test_server_errors_are_transient() {
        let c = classifier();
        for code in [500, 502, 504] {
            assert_eq!(c.classify(&status(code, &[]), 0), ProbeCategory::Transient);
            assert!(c.is_transient(&status(code, &[])));
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        let c = classifier();
        for code in [400, 401, 403, 404] {
            assert_eq!(c.classify(&status(code, &[]), 0), ProbeCategory::Fatal, "{}", code);
        }
    }

    #[test]
    fn test_transport_failures() {
        let c = classifier();
        let timeout = RawOutcome::failed(
            TransportFailure::new(FailureKind::Timeout, "timed out"),
            Duration::from_secs(30),
        );
        assert_eq!(c.classify(&timeout, 0), ProbeCategory::Transient);

        let builder = RawOutcome::failed(
            TransportFailure::new(FailureKind::Builder, "bad url"),
            Duration::ZERO,
        );
        assert_eq!(c.classify(&builder, 0), ProbeCategory::Fatal);
        assert!(!c.is_transient(&builder));
    }

    #[test]
    fn test_limit_signal_helper() {
        assert!(ProbeCategory::SoftSignal.is_limit_signal());
        assert!(ProbeCategory::HardSignal.is_limit_signal());
        assert!(!ProbeCategory::Transient.is_limit_signal());
    }
}
