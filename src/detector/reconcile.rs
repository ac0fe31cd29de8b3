//! Post-run analysis of a site's tier results.
//!
//! All functions here are pure: the same tier results always give the same
//! reconciliation, recommendation and warnings.

use crate::config::CONSISTENCY_TOLERANCE;
use crate::headers::{declared_for_window, DeclaredLimit};
use crate::models::{Confidence, DetectionMethod, Reconciliation, TierOutcome, TierResult};

/// Compares what the server declared for a tier with what was measured.
///
/// The declared value comes from the tier's own probes, falling back to the
/// pre-flight probe. When both exist and differ, the stricter one is
/// authoritative and confidence is `min / max`. Tiers that did not find a
/// limit get `Confidence::Unknown`.
///
/// # Arguments
///
/// * `tier` - The finished tier
/// * `preflight` - Limits declared on the pre-flight probe
pub fn reconcile(tier: &TierResult, preflight: &[DeclaredLimit]) -> Reconciliation {
    let declared = declared_for_window(&tier.declared_limits, tier.window_seconds)
        .or_else(|| declared_for_window(preflight, tier.window_seconds));

    let (empirical, authoritative, confidence) = match &tier.outcome {
        TierOutcome::LimitFound {
            limit,
            detected_via: DetectionMethod::Headers,
            ..
        } => (None, Some(*limit), Confidence::Score(1.0)),
        TierOutcome::LimitFound {
            limit,
            detected_via: DetectionMethod::ErrorRate,
            ..
        } => match declared {
            Some(declared) => {
                let low = declared.min(*limit);
                let high = declared.max(*limit).max(1);
                (
                    Some(*limit),
                    Some(low),
                    Confidence::Score(low as f64 / high as f64),
                )
            }
            None => (Some(*limit), Some(*limit), Confidence::Score(1.0)),
        },
        TierOutcome::Exhausted { .. } => (None, declared, Confidence::Unknown),
        TierOutcome::Aborted { .. } => (None, None, Confidence::Unknown),
    };

    Reconciliation {
        tier_name: tier.tier_name.clone(),
        declared_limit: declared,
        empirical_limit: empirical,
        authoritative_limit: authoritative,
        confidence,
    }
}

/// Name of the tier with the lowest per-second limit. The first tier wins ties.
pub fn most_restrictive(tiers: &[TierResult]) -> Option<String> {
    let mut best: Option<(&TierResult, f64)> = None;
    for tier in tiers {
        let Some(limit) = tier.outcome.limit() else {
            continue;
        };
        let per_second = tier.per_second(limit as f64);
        match best {
            Some((_, current)) if current <= per_second => {}
            _ => best = Some((tier, per_second)),
        }
    }
    best.map(|(tier, _)| tier.tier_name.clone())
}

/// Requests per second it is safe to sustain.
///
/// The lowest margin-reduced authoritative limit, normalised per second. If
/// no tier has an authoritative limit, the lowest margin-reduced clean rate
/// among exhausted tiers. `None` when nothing was measured.
pub fn recommended_rate(tiers: &[TierResult], reconciliation: &[Reconciliation]) -> Option<f64> {
    let from_limits = tiers
        .iter()
        .zip(reconciliation)
        .filter_map(|(tier, rec)| {
            let limit = rec.authoritative_limit?;
            Some(tier.per_second(margin_reduced(limit as f64, tier.safety_margin_percent)))
        })
        .fold(None, min_f64);
    if from_limits.is_some() {
        return from_limits;
    }

    tiers
        .iter()
        .filter(|tier| matches!(tier.outcome, TierOutcome::Exhausted { .. }))
        .filter_map(|tier| {
            let clean = tier.highest_clean_rate?;
            Some(tier.per_second(margin_reduced(f64::from(clean), tier.safety_margin_percent)))
        })
        .fold(None, min_f64)
}

/// Warns where a shorter window allows more per second than the next longer one.
///
/// A 100/minute limit next to a 1000/hour limit is fine for bursts, but the
/// minute limit alone would suggest 6000/hour; the warning says so. Tiers
/// must be in ascending window order.
pub fn consistency_warnings(
    tiers: &[TierResult],
    reconciliation: &[Reconciliation],
) -> Vec<String> {
    let limits: Vec<(&TierResult, u64)> = tiers
        .iter()
        .zip(reconciliation)
        .filter_map(|(tier, rec)| rec.authoritative_limit.map(|limit| (tier, limit)))
        .collect();

    limits
        .windows(2)
        .filter_map(|pair| {
            let (shorter, shorter_limit) = pair[0];
            let (longer, longer_limit) = pair[1];
            let shorter_rate = shorter.per_second(shorter_limit as f64);
            let longer_rate = longer.per_second(longer_limit as f64);
            (shorter_rate > longer_rate * (1.0 + CONSISTENCY_TOLERANCE)).then(|| {
                format!(
                    "tier '{}' limit {}/{}s extrapolates to {:.0}/{}s but tier '{}' limit is {}",
                    shorter.tier_name,
                    shorter_limit,
                    shorter.window_seconds,
                    shorter_rate * longer.window_seconds as f64,
                    longer.window_seconds,
                    longer.tier_name,
                    longer_limit
                )
            })
        })
        .collect()
}

fn margin_reduced(value: f64, margin_percent: f64) -> f64 {
    value * (1.0 - margin_percent / 100.0)
}

fn min_f64(acc: Option<f64>, value: f64) -> Option<f64> {
    Some(acc.map_or(value, |current| current.min(value)))
}
