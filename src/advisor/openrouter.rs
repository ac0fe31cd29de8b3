//! Model-backed recommendations through an OpenAI-compatible chat API.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Advisor;
use crate::config::AdvisorSettings;
use crate::error_handling::AdvisorError;
use crate::models::{RateLimitProfile, Recommendation, RecommendationAnalysis, TierOutcome};

const SYSTEM_PROMPT: &str = "You are an expert in API rate limiting and client design. \
Answer with a single JSON object and nothing else.";

/// Chat-completions client for OpenRouter or any compatible endpoint.
pub struct OpenRouterAdvisor {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

/// Fields the model is asked to return. Missing fields default to empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdvisorReply {
    optimal_usage_strategy: String,
    implementation_patterns: Vec<String>,
    error_handling_advice: Vec<String>,
    monitoring_suggestions: Vec<String>,
    scaling_recommendations: Vec<String>,
    confidence_score: Option<f64>,
    risk_assessment: String,
    estimated_cost_impact: String,
}

impl OpenRouterAdvisor {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Builds an advisor from the configuration, reading the key from the environment.
    ///
    /// # Errors
    ///
    /// Returns `AdvisorError::MissingApiKey` if the variable named by
    /// `api_key_env` is unset or empty.
    pub fn from_settings(settings: &AdvisorSettings) -> Result<Self, AdvisorError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AdvisorError::MissingApiKey(settings.api_key_env.clone()))?;
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self::new(
            client,
            settings.base_url.clone(),
            settings.model.clone(),
            api_key,
        ))
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdvisorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.2,
        });

        log::debug!("Requesting recommendation from {} ({})", url, self.model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdvisorError::Status(status.as_u16()));
        }

        let payload: Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdvisorError::InvalidResponse("missing choices[0].message.content".into()))
    }

    fn parse_reply(&self, content: &str) -> Result<Recommendation, AdvisorError> {
        let reply: AdvisorReply = serde_json::from_str(strip_code_fence(content))
            .map_err(|e| AdvisorError::InvalidResponse(e.to_string()))?;
        Ok(Recommendation {
            generated_by: self.model.clone(),
            generated_at: Utc::now(),
            analysis: RecommendationAnalysis {
                optimal_usage_strategy: reply.optimal_usage_strategy,
                implementation_patterns: reply.implementation_patterns,
                error_handling_advice: reply.error_handling_advice,
                monitoring_suggestions: reply.monitoring_suggestions,
                scaling_recommendations: reply.scaling_recommendations,
            },
            confidence_score: reply.confidence_score.unwrap_or(0.5).clamp(0.0, 1.0),
            risk_assessment: reply.risk_assessment,
            estimated_cost_impact: reply.estimated_cost_impact,
            error_details: None,
        })
    }
}

#[async_trait]
impl Advisor for OpenRouterAdvisor {
    fn name(&self) -> &str {
        &self.model
    }

    async fn recommend(&self, profile: &RateLimitProfile) -> Result<Recommendation, AdvisorError> {
        let content = self.complete(&build_prompt(profile)).await?;
        self.parse_reply(&content)
    }
}

/// Models often wrap JSON in a markdown fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Renders the profile as the user prompt.
pub fn build_prompt(profile: &RateLimitProfile) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Rate limit detection results for '{}' ({}).",
        profile.site_name, profile.base_url
    );
    let _ = writeln!(
        prompt,
        "Requests sent: {}, duration: {:.0}s, endpoints: {}",
        profile.total_requests_sent,
        profile.total_duration_seconds,
        profile.endpoints_tested.join(", ")
    );
    let _ = writeln!(prompt, "\nTiers:");
    for tier in &profile.tiers {
        let line = match &tier.outcome {
            TierOutcome::LimitFound {
                limit,
                detected_via,
                optimal_rate,
                ..
            } => format!(
                "limit {} per {}s via {}, optimal {:.1}",
                limit, tier.window_seconds, detected_via, optimal_rate
            ),
            TierOutcome::Exhausted { rate_reached, .. } => format!(
                "no limit up to {} per {}s",
                rate_reached, tier.window_seconds
            ),
            TierOutcome::Aborted { reason } => format!("not completed ({})", reason),
        };
        let _ = writeln!(
            prompt,
            "- {}: {}; error rate {:.1}%, mean latency {:.0}ms",
            tier.tier_name,
            line,
            tier.error_rate * 100.0,
            tier.average_latency_ms
        );
    }
    if let Some(tier) = &profile.most_restrictive_tier {
        let _ = writeln!(prompt, "\nMost restrictive tier: {}", tier);
    }
    if let Some(rate) = profile.recommended_rate {
        let _ = writeln!(prompt, "Recommended sustained rate: {:.4} req/s", rate);
    }
    for warning in &profile.consistency_warnings {
        let _ = writeln!(prompt, "Warning: {}", warning);
    }
    prompt.push_str(
        "\nReturn JSON with these fields: optimal_usage_strategy (string), \
         implementation_patterns (array of strings), error_handling_advice (array of strings), \
         monitoring_suggestions (array of strings), scaling_recommendations (array of strings), \
         confidence_score (number 0-1), risk_assessment (string), estimated_cost_impact (string).",
    );
    prompt
}
