// src/confidence.rs

//! # Confidence Scorer
//!
//! Fuses price staleness, spread strength, whale flow and an optional ML
//! prediction into one bounded confidence value in `[0, 1]`. The scorer is
//! stateless given its inputs; all tuning constants come from the single
//! injected [`ConfidenceSettings`].
//!
//! Two hard bounds hold by construction:
//! - the age penalty is monotonic in staleness and clamped to `[0, 1]`, so a
//!   stale (or clock-skewed) leg can never *increase* confidence;
//! - whale and ML boosts compose multiplicatively but the composed multiplier
//!   is capped, so no single influenced input channel can stack boosts and
//!   push a marginal opportunity over the execution threshold.

use crate::config::ConfidenceSettings;
use crate::types::Asset;
use std::sync::Arc;
use std::time::Duration;

/// Signal derived from the price legs themselves.
#[derive(Debug, Clone)]
pub struct BaseSignal {
    /// Spread between the legs, basis points of the buy price.
    pub spread_bps: f64,
    /// Age of the oldest leg in the candidate.
    pub max_leg_age: Duration,
    /// The chain's staleness window; legs at or beyond it score zero.
    pub staleness_window: Duration,
}

/// Whale flow aligned with the candidate's base asset. The detector matches
/// flows by exact [`Asset`] equality before constructing this.
#[derive(Debug, Clone)]
pub struct WhaleSignal {
    pub asset: Asset,
    pub flow_usd: f64,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    settings: Arc<ConfidenceSettings>,
}

impl ConfidenceScorer {
    pub fn new(settings: Arc<ConfidenceSettings>) -> Self {
        Self { settings }
    }

    /// Multiplier in `[0, 1]` that decays linearly with leg age and reaches
    /// zero at the staleness window. Defensive inputs (zero window, skewed
    /// clocks) clamp rather than go negative.
    pub fn age_multiplier(&self, age: Duration, window: Duration) -> f64 {
        if window.is_zero() {
            return 0.0;
        }
        let ratio = age.as_secs_f64() / window.as_secs_f64();
        (1.0 - ratio).clamp(0.0, 1.0)
    }

    /// Composed whale/ML boost, capped at `max_composed_boost`.
    pub fn composed_boost(&self, whale: Option<&WhaleSignal>, ml_prediction: Option<f64>) -> f64 {
        let mut boost = 1.0_f64;
        if whale.is_some() {
            boost *= self.settings.whale_boost;
        }
        if let Some(pred) = ml_prediction {
            let pred = pred.clamp(0.0, 1.0);
            // Neutral prediction (0.5) leaves the score untouched; deviation
            // scales by ml_weight in either direction.
            boost *= 1.0 + self.settings.ml_weight * (pred - 0.5) * 2.0;
        }
        boost.clamp(0.0, self.settings.max_composed_boost)
    }

    /// Fused confidence in `[0, 1]`.
    pub fn score(
        &self,
        base: &BaseSignal,
        whale: Option<&WhaleSignal>,
        ml_prediction: Option<f64>,
    ) -> f64 {
        if !base.spread_bps.is_finite() || base.spread_bps <= 0.0 {
            return 0.0;
        }
        // Saturating spread strength: half score at spread_half_score_bps.
        let strength = base.spread_bps / (base.spread_bps + self.settings.spread_half_score_bps);
        let freshness = self.age_multiplier(base.max_leg_age, base.staleness_window);
        let boost = self.composed_boost(whale, ml_prediction);
        (strength * freshness * boost).clamp(0.0, 1.0)
    }
}
