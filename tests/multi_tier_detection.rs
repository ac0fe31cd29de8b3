//! Multi-tier detection against a simulated API.
//!
//! These tests drive `MultiTierDetector` through its public API with tokio's
//! clock paused, so hour-long tiers complete instantly.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use helpers::{site, tier, SimulatedApi};
use rate_limit_detector::config::{DetectionSettings, RetryPolicy};
use rate_limit_detector::models::{
    AbortReason, Confidence, DetectionMethod, RunStatus, TierOutcome,
};
use rate_limit_detector::MultiTierDetector;

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay_ms: 200,
        backoff_multiplier: 2.0,
        max_delay_ms: 2_000,
        jitter: false,
    }
}

fn detector(api: Arc<SimulatedApi>) -> MultiTierDetector {
    MultiTierDetector::new(api, DetectionSettings::default(), retry(), Duration::from_secs(5))
        .with_rotation_seed(11)
}

#[tokio::test(start_paused = true)]
async fn test_declared_limits_confirmed_for_each_window() {
    let api = Arc::new(
        SimulatedApi::unlimited()
            .declaring("X-RateLimit-Limit-Minute", "120")
            .declaring("X-RateLimit-Limit-Hour", "1000"),
    );
    let tiers = vec![
        tier("minute", 60, 10, 500, 10, 60.0),
        tier("hour", 3_600, 100, 5_000, 100, 600.0),
    ];

    let profile = detector(api)
        .detect("declared", &site("https://api.example.com"), &tiers)
        .await
        .expect("profile");

    assert_eq!(profile.run_status, RunStatus::Determined);
    for (name, expected) in [("minute", 120), ("hour", 1_000)] {
        let result = profile.tier(name).expect("tier result");
        match &result.outcome {
            TierOutcome::LimitFound {
                limit, detected_via, ..
            } => {
                assert_eq!(*limit, expected, "limit for {}", name);
                assert_eq!(*detected_via, DetectionMethod::Headers);
            }
            other => panic!("expected a limit for {}, got {:?}", name, other),
        }
        assert_eq!(result.batches, 2, "two agreeing batches confirm a declared limit");
        let reconciliation = profile.reconciliation_for(name).expect("reconciliation");
        assert_eq!(reconciliation.confidence, Confidence::Score(1.0));
    }

    assert_eq!(profile.most_restrictive_tier.as_deref(), Some("hour"));
    let recommended = profile.recommended_rate.expect("recommended rate");
    assert!((recommended - 1_000.0 * 0.9 / 3_600.0).abs() < 1e-9);
    assert_eq!(
        profile.consistency_warnings,
        vec!["tier 'minute' limit 120/60s extrapolates to 7200/3600s but tier 'hour' limit is 1000"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttling_found_by_error_rate() {
    let api = Arc::new(SimulatedApi::with_quota(40, Duration::from_secs(60)));
    let tiers = vec![tier("minute", 60, 20, 200, 10, 60.0)];

    let profile = detector(Arc::clone(&api))
        .detect("throttled", &site("https://api.example.com"), &tiers)
        .await
        .expect("profile");

    let minute = profile.tier("minute").expect("minute tier");
    let limit = match &minute.outcome {
        TierOutcome::LimitFound {
            limit,
            detected_via,
            optimal_rate,
            ..
        } => {
            assert_eq!(*detected_via, DetectionMethod::ErrorRate);
            assert!((optimal_rate - *limit as f64 * 0.9).abs() < 1e-9);
            *limit
        }
        other => panic!("expected throttling to be detected, got {:?}", other),
    };
    assert!([30, 40].contains(&limit), "limit {} should be the last clean rate", limit);
    assert!(minute.error_rate > 0.05);

    let reconciliation = profile.reconciliation_for("minute").expect("reconciliation");
    assert_eq!(reconciliation.declared_limit, None);
    assert_eq!(reconciliation.authoritative_limit, Some(limit));
    assert_eq!(reconciliation.confidence, Confidence::Score(1.0));

    assert_eq!(
        profile.total_requests_sent,
        api.calls(),
        "every request the API saw is accounted for"
    );
    assert_eq!(profile.endpoints_tested.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_partial_results() {
    let api = Arc::new(SimulatedApi::unlimited());
    let tiers = vec![
        tier("minute", 60, 10, 1_000, 10, 60.0),
        tier("hour", 3_600, 600, 60_000, 600, 600.0),
    ];
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(150)).await;
        trigger.cancel();
    });

    let profile = detector(api)
        .with_cancellation(cancel)
        .detect("cancelled", &site("https://api.example.com"), &tiers)
        .await
        .expect("partial profile");

    assert_eq!(
        profile.run_status,
        RunStatus::Aborted {
            reason: "cancelled".to_string()
        }
    );
    let minute = profile.tier("minute").expect("minute tier");
    assert_eq!(minute.outcome.abort_reason(), Some(&AbortReason::Cancelled));
    assert!(minute.probes_sent > 0, "probes sent before cancelling are kept");
    assert_eq!(
        profile.tier("hour").and_then(|t| t.outcome.abort_reason()),
        Some(&AbortReason::Cancelled)
    );
    assert_eq!(
        profile.recommended_rate, None,
        "aborted tiers never produce a recommendation"
    );
}
