//! Rule-based recommendations.

use async_trait::async_trait;
use chrono::Utc;

use super::Advisor;
use crate::error_handling::AdvisorError;
use crate::models::{
    RateLimitProfile, Recommendation, RecommendationAnalysis, RunStatus, TierOutcome,
};

/// Builds advice from the profile alone, without any external service.
pub struct FallbackAdvisor;

impl FallbackAdvisor {
    pub const NAME: &'static str = "fallback";

    /// Builds a recommendation for `profile`.
    ///
    /// `error_details` records why a model-backed advisor was not used.
    pub fn build(profile: &RateLimitProfile, error_details: Option<String>) -> Recommendation {
        let strategy = match (&profile.most_restrictive_tier, profile.recommended_rate) {
            (Some(tier), Some(rate)) => format!(
                "The '{}' tier is the binding limit. Sustain at most {:.3} requests per second \
                 ({:.1} per minute) and spread requests evenly instead of bursting.",
                tier,
                rate,
                rate * 60.0
            ),
            (None, Some(rate)) => format!(
                "No limit was triggered. The highest tested rate with margin is {:.3} requests \
                 per second; treat it as a floor rather than the real limit.",
                rate
            ),
            (_, None) => "Detection did not produce a usable rate. Start slowly, honour \
                          Retry-After and measure again once the site is reachable."
                .to_string(),
        };

        let reset_hint = profile
            .tiers
            .iter()
            .find_map(|tier| match &tier.outcome {
                TierOutcome::LimitFound {
                    reset_time: Some(reset),
                    ..
                } => Some(format!(
                    "Limits observed to reset around {}; schedule batch work after resets",
                    reset.format("%H:%M:%S UTC")
                )),
                _ => None,
            })
            .unwrap_or_else(|| "Track reset headers to schedule batch work after resets".to_string());

        let alert_at = profile
            .recommended_rate
            .map(|rate| format!("Alert when sustained traffic exceeds {:.3} req/s", rate * 0.9))
            .unwrap_or_else(|| "Alert on any burst of 429 responses".to_string());

        let risk = match &profile.run_status {
            RunStatus::Determined if profile.consistency_warnings.is_empty() => {
                "LOW - limits were measured directly"
            }
            RunStatus::Determined => "MEDIUM - tiers disagree, see consistency warnings",
            RunStatus::Exhausted => "MEDIUM - no limit was triggered, the real limit is unknown",
            RunStatus::Aborted { .. } => "HIGH - detection was aborted, results are partial",
        };

        Recommendation {
            generated_by: Self::NAME.to_string(),
            generated_at: Utc::now(),
            analysis: RecommendationAnalysis {
                optimal_usage_strategy: strategy,
                implementation_patterns: vec![
                    "Use a token bucket sized to the recommended rate".to_string(),
                    "Back off exponentially with jitter after a 429".to_string(),
                    "Queue non-urgent requests instead of sending them immediately".to_string(),
                ],
                error_handling_advice: vec![
                    "Wait for Retry-After before retrying a throttled request".to_string(),
                    "Stop after a few consecutive 429 responses and cool down".to_string(),
                    "Log every throttling event with its headers".to_string(),
                ],
                monitoring_suggestions: vec![
                    alert_at,
                    reset_hint,
                    "Watch X-RateLimit-Remaining to catch limit changes early".to_string(),
                ],
                scaling_recommendations: vec![
                    "Cache responses to avoid spending quota on repeated reads".to_string(),
                    "Prioritise critical requests when close to the limit".to_string(),
                ],
            },
            confidence_score: 0.6,
            risk_assessment: risk.to_string(),
            estimated_cost_impact: "Staying under the recommended rate should avoid throttling errors"
                .to_string(),
            error_details,
        }
    }
}

#[async_trait]
impl Advisor for FallbackAdvisor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn recommend(&self, profile: &RateLimitProfile) -> Result<Recommendation, AdvisorError> {
        Ok(Self::build(profile, None))
    }
}
