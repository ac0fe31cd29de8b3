//! Result data model.
//!
//! Everything a detection run reports, from a single probe up to the per-site
//! profile. All types serialize to JSON for the results file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ProbeCategory;
use crate::headers::{DeclaredLimit, HeaderSnapshot};
use crate::rotation::{EndpointUsage, LimitScope};

/// One classified probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub category: ProbeCategory,
    pub retries: u32,
    pub declared: Vec<DeclaredLimit>,
    pub retry_after_secs: Option<f64>,
}

/// Rate-limit headers as seen on one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderObservation {
    pub observed_at: DateTime<Utc>,
    pub endpoint: String,
    pub status: Option<u16>,
    pub headers: HeaderSnapshot,
}

/// How a limit was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// The error rate crossed the threshold.
    ErrorRate,
    /// The server declared it consistently in its headers.
    Headers,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::ErrorRate => write!(f, "error_rate"),
            DetectionMethod::Headers => write!(f, "headers"),
        }
    }
}

/// Why a tier stopped ramping without finding a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Reached the tier's `max_rate` cleanly.
    RateCap,
    /// Reached the ceiling implied by a stricter, shorter tier.
    CeilingCap,
    /// Ran out of `max_test_duration`.
    TimeBudget,
}

/// Why a tier did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// A stricter limit was already found and the run stops on first limit.
    Skipped,
    /// The run was cancelled.
    Cancelled,
    /// A probe got an unrecoverable response.
    Fatal { detail: String },
    /// An earlier tier hit a fatal error, so the site was abandoned.
    SiteAborted { tier: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Skipped => write!(f, "skipped - stricter limit already found"),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::Fatal { detail } => write!(f, "fatal: {}", detail),
            AbortReason::SiteAborted { tier } => {
                write!(f, "site aborted after fatal error in tier '{}'", tier)
            }
        }
    }
}

/// Terminal state of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierOutcome {
    LimitFound {
        /// Highest sustainable rate, in requests per window.
        limit: u64,
        window_seconds: u64,
        detected_via: DetectionMethod,
        reset_time: Option<DateTime<Utc>>,
        /// `limit` reduced by the tier's safety margin.
        optimal_rate: f64,
    },
    Exhausted {
        max_rate_reached: bool,
        reason: ExhaustionReason,
        /// Highest rate tested, in requests per window.
        rate_reached: u32,
    },
    Aborted {
        reason: AbortReason,
    },
}

impl TierOutcome {
    pub fn is_limit_found(&self) -> bool {
        matches!(self, TierOutcome::LimitFound { .. })
    }

    /// The discovered limit, if any.
    pub fn limit(&self) -> Option<u64> {
        match self {
            TierOutcome::LimitFound { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            TierOutcome::Aborted { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Everything observed while testing one tier. Not modified after the tier ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub tier_name: String,
    pub window_seconds: u64,
    pub safety_margin_percent: f64,
    pub outcome: TierOutcome,
    /// Scheduled probes (retries excluded).
    pub probes_sent: u64,
    pub retries: u64,
    pub batches: u32,
    /// Fraction of probes that ended as a limit signal or exhausted transient.
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Highest rate whose batch was clean.
    pub highest_clean_rate: Option<u32>,
    pub declared_limits: Vec<DeclaredLimit>,
    pub header_snapshots: Vec<HeaderObservation>,
    pub endpoint_usage: BTreeMap<String, EndpointUsage>,
    pub limit_scope: LimitScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TierResult {
    /// A tier that never ran.
    pub fn not_run(
        tier_name: &str,
        window_seconds: u64,
        safety_margin_percent: f64,
        reason: AbortReason,
    ) -> Self {
        let now = Utc::now();
        Self {
            tier_name: tier_name.to_string(),
            window_seconds,
            safety_margin_percent,
            outcome: TierOutcome::Aborted { reason },
            probes_sent: 0,
            retries: 0,
            batches: 0,
            error_rate: 0.0,
            average_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            highest_clean_rate: None,
            declared_limits: Vec::new(),
            header_snapshots: Vec::new(),
            endpoint_usage: BTreeMap::new(),
            limit_scope: LimitScope::Undetermined,
            started_at: now,
            finished_at: now,
        }
    }

    /// Requests per second for a count over this tier's window.
    pub fn per_second(&self, per_window: f64) -> f64 {
        per_window / self.window_seconds.max(1) as f64
    }
}

/// How far declared and empirical limits agree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// In `[0, 1]`; `min / max` of the two limits, 1.0 when only one exists.
    Score(f64),
    Unknown,
}

impl Confidence {
    pub fn score(&self) -> Option<f64> {
        match self {
            Confidence::Score(score) => Some(*score),
            Confidence::Unknown => None,
        }
    }
}

/// Declared versus measured limit for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub tier_name: String,
    pub declared_limit: Option<u64>,
    pub empirical_limit: Option<u64>,
    /// The stricter of the two; what recommendations are based on.
    pub authoritative_limit: Option<u64>,
    pub confidence: Confidence,
}

/// Overall result of a site run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// At least one tier found a limit.
    Determined,
    /// Every tier ran out of rate or time without finding one.
    Exhausted,
    Aborted { reason: String },
}

/// Per-site detection result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitProfile {
    pub site_name: String,
    pub base_url: String,
    pub run_status: RunStatus,
    /// One entry per tier, in the order tested.
    pub tiers: Vec<TierResult>,
    pub reconciliation: Vec<Reconciliation>,
    pub most_restrictive_tier: Option<String>,
    /// Requests per second it is safe to sustain, if one can be given.
    pub recommended_rate: Option<f64>,
    pub total_requests_sent: u64,
    pub total_duration_seconds: f64,
    pub endpoints_tested: Vec<String>,
    /// Limits the server declared on the pre-flight probe.
    pub preflight_limits: Vec<DeclaredLimit>,
    pub consistency_warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RateLimitProfile {
    pub fn tier(&self, name: &str) -> Option<&TierResult> {
        self.tiers.iter().find(|t| t.tier_name == name)
    }

    pub fn reconciliation_for(&self, name: &str) -> Option<&Reconciliation> {
        self.reconciliation.iter().find(|r| r.tier_name == name)
    }

    pub fn limits_found(&self) -> usize {
        self.tiers.iter().filter(|t| t.outcome.is_limit_found()).count()
    }
}

/// Usage advice for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationAnalysis {
    pub optimal_usage_strategy: String,
    pub implementation_patterns: Vec<String>,
    pub error_handling_advice: Vec<String>,
    pub monitoring_suggestions: Vec<String>,
    pub scaling_recommendations: Vec<String>,
}

/// Advice produced for a profile, by a model or by the built-in rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Model name, or `fallback` for the rule-based advisor.
    pub generated_by: String,
    pub generated_at: DateTime<Utc>,
    pub analysis: RecommendationAnalysis,
    pub confidence_score: f64,
    pub risk_assessment: String,
    pub estimated_cost_impact: String,
    /// Why the fallback was used, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Profile and advice for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteReport {
    pub site_name: String,
    pub profile: RateLimitProfile,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
}

/// A site whose detection could not run at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFailure {
    pub site_name: String,
    pub error: String,
}

/// Everything a run produced; this is what the results file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub started_at: DateTime<Utc>,
    pub sites: Vec<SiteReport>,
    #[serde(default)]
    pub failures: Vec<SiteFailure>,
    /// Where the report was saved, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub elapsed_seconds: f64,
}

impl DetectionReport {
    pub fn site(&self, name: &str) -> Option<&SiteReport> {
        self.sites.iter().find(|s| s.site_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reason_display() {
        assert_eq!(
            AbortReason::Skipped.to_string(),
            "skipped - stricter limit already found"
        );
        assert_eq!(AbortReason::Cancelled.to_string(), "cancelled");
        assert_eq!(
            AbortReason::Fatal {
                detail: "status 401 from /users".to_string()
            }
            .to_string(),
            "fatal: status 401 from /users"
        );
    }

    #[test]
    fn test_tier_outcome_json_shape() {
        let outcome = TierOutcome::LimitFound {
            limit: 55,
            window_seconds: 60,
            detected_via: DetectionMethod::ErrorRate,
            reset_time: None,
            optimal_rate: 49.5,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "limit_found");
        assert_eq!(json["detected_via"], "error_rate");
        assert_eq!(json["limit"], 55);

        let aborted = TierOutcome::Aborted {
            reason: AbortReason::SiteAborted {
                tier: "minute".to_string(),
            },
        };
        let json = serde_json::to_value(&aborted).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["reason"]["kind"], "site_aborted");
    }

    #[test]
    fn test_not_run_tier() {
        let tier = TierResult::not_run("day", 86_400, 10.0, AbortReason::Skipped);
        assert_eq!(tier.outcome.abort_reason(), Some(&AbortReason::Skipped));
        assert_eq!(tier.probes_sent, 0);
        assert_eq!(tier.outcome.limit(), None);
    }
}
