//! Usage recommendations for a detected profile.
//!
//! An [`Advisor`] turns a [`RateLimitProfile`] into practical advice. The
//! model-backed advisor is optional; whenever it is disabled or fails, the
//! rule-based [`FallbackAdvisor`] answers instead, so detection results never
//! depend on it.

mod fallback;
mod openrouter;

use async_trait::async_trait;

pub use fallback::FallbackAdvisor;
pub use openrouter::{build_prompt, OpenRouterAdvisor};

use crate::error_handling::AdvisorError;
use crate::models::{RateLimitProfile, Recommendation};

/// Produces a recommendation for one profile.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn recommend(&self, profile: &RateLimitProfile) -> Result<Recommendation, AdvisorError>;
}

/// Asks `advisor` for a recommendation, falling back to the built-in rules.
///
/// # Arguments
///
/// * `advisor` - The preferred advisor, or `None` when disabled
/// * `profile` - The profile to advise on
pub async fn recommend_or_fallback(
    advisor: Option<&dyn Advisor>,
    profile: &RateLimitProfile,
) -> Recommendation {
    let Some(advisor) = advisor else {
        return FallbackAdvisor::build(profile, None);
    };
    match advisor.recommend(profile).await {
        Ok(recommendation) => recommendation,
        Err(e) => {
            log::warn!(
                "Advisor {} failed for '{}', using rule-based advice: {}",
                advisor.name(),
                profile.site_name,
                e
            );
            FallbackAdvisor::build(profile, Some(e.to_string()))
        }
    }
}
