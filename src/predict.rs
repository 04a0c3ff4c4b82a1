// src/predict.rs

//! # Online Bridge Latency / Success Model
//!
//! A lightweight per-route model of observed bridge latency and success rate.
//! It feeds two consumers: the confidence scorer (success prediction as the
//! ML input) and the bridge estimator (latency blend for ETA).
//!
//! `record_observation` is a public feedback channel, so it is hardened:
//! per-caller rate limited and bounds-checked. A misbehaving caller cannot
//! flood the model or inject implausible latencies to bias future routing.

use crate::config::BridgeSettings;
use crate::errors::ValidationError;
use crate::types::ChainId;
use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EWMA_ALPHA: f64 = 0.2;
/// Observations required before the model's outputs are trusted.
const MIN_SAMPLES: u64 = 5;

/// A directed bridge route between two chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub src: ChainId,
    pub dst: ChainId,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

#[derive(Debug, Clone, Copy)]
struct RouteStats {
    ewma_latency_ms: f64,
    success_rate: f64,
    samples: u64,
}

/// Exponentially-weighted per-route latency/success model.
pub struct LatencyModel {
    routes: DashMap<RouteKey, RouteStats>,
    feedback_limiter: DefaultKeyedRateLimiter<String>,
    max_plausible_latency_ms: u64,
}

impl fmt::Debug for LatencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyModel")
            .field("routes", &self.routes.len())
            .field("max_plausible_latency_ms", &self.max_plausible_latency_ms)
            .finish()
    }
}

impl LatencyModel {
    pub fn new(settings: &BridgeSettings) -> Arc<Self> {
        let per_sec = NonZeroU32::new(settings.feedback_updates_per_sec.max(1))
            .unwrap_or_else(|| NonZeroU32::new(1).unwrap());
        Arc::new(Self {
            routes: DashMap::new(),
            feedback_limiter: RateLimiter::keyed(Quota::per_second(per_sec)),
            max_plausible_latency_ms: settings.max_plausible_latency_ms,
        })
    }

    /// Records one observed bridge transfer. `caller` identifies the feedback
    /// source for rate-limiting purposes.
    pub fn record_observation(
        &self,
        caller: &str,
        route: RouteKey,
        observed_latency_ms: u64,
        success: bool,
    ) -> Result<(), ValidationError> {
        if self.feedback_limiter.check_key(&caller.to_string()).is_err() {
            warn!(caller, %route, "Bridge telemetry rate limit exceeded; dropping observation");
            return Err(ValidationError::FeedbackRateLimited { caller: caller.to_string() });
        }
        if observed_latency_ms > self.max_plausible_latency_ms {
            warn!(
                caller,
                %route,
                observed_latency_ms,
                max = self.max_plausible_latency_ms,
                "Implausible bridge latency observation rejected"
            );
            return Err(ValidationError::LatencyOutOfBounds {
                observed_ms: observed_latency_ms,
                max_ms: self.max_plausible_latency_ms,
            });
        }

        let outcome = if success { 1.0 } else { 0.0 };
        let mut entry = self.routes.entry(route).or_insert(RouteStats {
            ewma_latency_ms: observed_latency_ms as f64,
            success_rate: outcome,
            samples: 0,
        });
        if entry.samples > 0 {
            entry.ewma_latency_ms =
                EWMA_ALPHA * observed_latency_ms as f64 + (1.0 - EWMA_ALPHA) * entry.ewma_latency_ms;
            entry.success_rate = EWMA_ALPHA * outcome + (1.0 - EWMA_ALPHA) * entry.success_rate;
        }
        entry.samples = entry.samples.saturating_add(1);
        debug!(
            %route,
            latency_ms = observed_latency_ms,
            success,
            samples = entry.samples,
            "Recorded bridge observation"
        );
        Ok(())
    }

    /// Predicted success probability for a route, once enough samples exist.
    pub fn predict_success(&self, route: RouteKey) -> Option<f64> {
        let stats = self.routes.get(&route)?;
        if stats.samples < MIN_SAMPLES {
            return None;
        }
        Some(stats.success_rate.clamp(0.0, 1.0))
    }

    /// Blends the configured latency prior with live observations.
    pub fn eta(&self, route: RouteKey, base_latency_ms: u64) -> Duration {
        let blended = match self.routes.get(&route) {
            Some(stats) if stats.samples >= MIN_SAMPLES => {
                0.5 * base_latency_ms as f64 + 0.5 * stats.ewma_latency_ms
            }
            _ => base_latency_ms as f64,
        };
        Duration::from_millis(blended.max(0.0) as u64)
    }
}
