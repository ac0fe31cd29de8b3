//! Error handling and probe statistics.
//!
//! This module provides:
//! - Error type definitions for configuration, detection, storage and the advisor
//! - Transport failure categorization for `reqwest` errors
//! - Probe statistics tracking (classified outcomes, failures, retries)

mod categorization;
mod stats;
mod types;

// Re-export public API
pub use categorization::categorize_reqwest_error;
pub use stats::ProbeStats;
pub use types::{
    AdvisorError, ConfigError, DetectionError, FailureKind, InitializationError, StorageError,
    TransportFailure,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ProbeCategory;
    use strum::IntoEnumIterator;

    #[test]
    fn test_probe_stats_initialization() {
        let stats = ProbeStats::new();
        for category in ProbeCategory::iter() {
            assert_eq!(stats.get_category_count(category), 0);
        }
        for kind in FailureKind::iter() {
            assert_eq!(stats.get_failure_count(kind), 0);
        }
        assert_eq!(stats.retries(), 0);
    }

    #[test]
    fn test_probe_stats_increment() {
        let stats = ProbeStats::new();
        stats.increment_category(ProbeCategory::SoftSignal);
        stats.increment_category(ProbeCategory::SoftSignal);
        stats.increment_category(ProbeCategory::Success);
        stats.increment_failure(FailureKind::Timeout);
        stats.add_retries(3);
        stats.add_malformed_headers(1);

        assert_eq!(stats.get_category_count(ProbeCategory::SoftSignal), 2);
        assert_eq!(stats.total_probes(), 3);
        assert_eq!(stats.total_failures(), 1);
        assert_eq!(stats.retries(), 3);
        assert_eq!(stats.malformed_headers(), 1);
    }

    #[test]
    fn test_only_builder_and_redirect_failures_are_fatal() {
        let fatal: Vec<FailureKind> = FailureKind::iter().filter(|k| k.is_fatal()).collect();
        assert_eq!(fatal, vec![FailureKind::Redirect, FailureKind::Builder]);
    }

    #[test]
    fn test_detection_error_messages() {
        let err = DetectionError::InvalidTier {
            tier: "minute".to_string(),
            reason: "increment must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid tier 'minute': increment must be at least 1"
        );
    }
}
