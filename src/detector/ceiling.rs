//! Cross-tier rate ceiling.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{TierOutcome, TierResult};

/// Strictest safe rate found so far in a site run, in requests per second.
///
/// Starts unbounded and can only be lowered. Each tier reads it when it starts
/// and lowers it to the margined rate of any limit it finds; later tiers never
/// ramp past it.
#[derive(Debug)]
pub struct CrossTierCeiling {
    per_second_bits: AtomicU64,
}

impl CrossTierCeiling {
    pub fn new() -> Self {
        Self {
            per_second_bits: AtomicU64::new(f64::INFINITY.to_bits()),
        }
    }

    /// Current ceiling in requests per second, `None` while unbounded.
    pub fn current(&self) -> Option<f64> {
        let value = f64::from_bits(self.per_second_bits.load(Ordering::Acquire));
        value.is_finite().then_some(value)
    }

    /// Lowers the ceiling to `per_second` if that is stricter.
    ///
    /// Returns true when the ceiling changed. Non-finite and negative values
    /// are ignored.
    pub fn tighten(&self, per_second: f64) -> bool {
        if !per_second.is_finite() || per_second < 0.0 {
            return false;
        }
        self.per_second_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (per_second < f64::from_bits(bits)).then_some(per_second.to_bits())
            })
            .is_ok()
    }

    /// Ceiling expressed as requests per `window_seconds`, at least 1.
    pub fn cap_for_window(&self, window_seconds: u64) -> Option<u32> {
        let per_second = self.current()?;
        // Tolerates float drift from the per-second round trip.
        let per_window = (per_second * window_seconds as f64 + 1e-9).floor();
        Some(if per_window >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            (per_window as u32).max(1)
        })
    }

    /// Tightens the ceiling to the safety-margined rate of a tier that found a limit.
    pub fn observe(&self, result: &TierResult) -> bool {
        match result.outcome {
            TierOutcome::LimitFound {
                window_seconds,
                optimal_rate,
                ..
            } => {
                let per_second = optimal_rate / window_seconds.max(1) as f64;
                let changed = self.tighten(per_second);
                if changed {
                    log::info!(
                        "Ceiling lowered to {:.4} req/s by tier '{}'",
                        per_second,
                        result.tier_name
                    );
                }
                changed
            }
            _ => false,
        }
    }
}

impl Default for CrossTierCeiling {
    fn default() -> Self {
        Self::new()
    }
}
