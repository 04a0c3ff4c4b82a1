// src/circuit.rs

//! # Circuit Breaker Registry
//!
//! Per-endpoint failure isolation: CLOSED → OPEN when consecutive failures
//! exceed the threshold, OPEN → HALF_OPEN after a (jittered, exponentially
//! escalating) cooldown, HALF_OPEN → CLOSED on a successful probe or back to
//! OPEN on a failed one.
//!
//! HALF_OPEN admits exactly one probe. The probe slot is granted through a
//! [`CallPermit`] and stays held until the permit reports a result (or is
//! dropped, which counts as a failure); concurrent callers arriving while a
//! probe is in flight get `CircuitError::ProbeInFlight` and are never routed
//! to the endpoint. Failure counting and state transition happen under one
//! lock acquisition, as a single atomic unit.

use crate::config::ResilienceSettings;
use crate::errors::CircuitError;
use crate::metrics::CIRCUIT_TRANSITIONS;
use crate::types::EndpointId;
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u64,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    backoff_multiplier: u64,
    probe_in_flight: bool,
    trips: u64,
    total_failures: u64,
    total_successes: u64,
}

/// Point-in-time view of a breaker, for tests and operator surfaces.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u64,
    pub probe_in_flight: bool,
    pub trips: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: EndpointId,
    settings: Arc<ResilienceSettings>,
    // The synchronous mutex lets the permit's Drop impl resolve without an
    // executor; nothing awaits while holding it.
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(endpoint: EndpointId, settings: Arc<ResilienceSettings>) -> Self {
        Self {
            endpoint,
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                current_cooldown: Duration::ZERO,
                backoff_multiplier: 1,
                probe_in_flight: false,
                trips: 0,
                total_failures: 0,
                total_successes: 0,
            }),
        }
    }

    /// Requests permission to call the protected endpoint. The returned
    /// permit must be resolved with `succeed()` or `fail()` once the call's
    /// outcome is known.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(CallPermit::new(self.clone(), false)),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.current_cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    self.record_transition("half_open");
                    info!(endpoint = %self.endpoint, "Circuit entering half-open; probe granted");
                    Ok(CallPermit::new(self.clone(), true))
                } else {
                    let retry_after_ms =
                        inner.current_cooldown.saturating_sub(elapsed).as_millis() as u64;
                    Err(CircuitError::Open { endpoint: self.endpoint.clone(), retry_after_ms })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitError::ProbeInFlight { endpoint: self.endpoint.clone() })
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self.clone(), true))
                }
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            probe_in_flight: inner.probe_in_flight,
            trips: inner.trips,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
        }
    }

    fn on_result(&self, probe: bool, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if success {
            inner.total_successes = inner.total_successes.saturating_add(1);
            if probe {
                inner.probe_in_flight = false;
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.backoff_multiplier = 1;
                inner.opened_at = None;
                self.record_transition("closed");
                info!(endpoint = %self.endpoint, "Probe succeeded; circuit closed");
            } else {
                inner.consecutive_failures = 0;
            }
            return;
        }

        inner.total_failures = inner.total_failures.saturating_add(1);
        if probe {
            inner.probe_in_flight = false;
            inner.backoff_multiplier =
                (inner.backoff_multiplier * 2).min(self.settings.max_backoff_multiplier.max(1));
            self.open(&mut inner);
            warn!(
                endpoint = %self.endpoint,
                backoff = inner.backoff_multiplier,
                "Probe failed; circuit re-opened with escalated cooldown"
            );
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            debug!(
                endpoint = %self.endpoint,
                consecutive = inner.consecutive_failures,
                threshold = self.settings.failure_threshold,
                "Recorded endpoint failure"
            );
            if inner.state == BreakerState::Closed
                && inner.consecutive_failures >= self.settings.failure_threshold
            {
                self.open(&mut inner);
                warn!(
                    endpoint = %self.endpoint,
                    failures = inner.consecutive_failures,
                    "Failure threshold exceeded; circuit opened"
                );
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.current_cooldown = self.jittered_cooldown(inner.backoff_multiplier);
        inner.trips = inner.trips.saturating_add(1);
        self.record_transition("open");
    }

    fn jittered_cooldown(&self, multiplier: u64) -> Duration {
        let base_ms = self.settings.open_cooldown_ms.saturating_mul(multiplier.max(1)) as f64;
        let jitter = if self.settings.jitter_factor > 0.0 {
            let range = base_ms * self.settings.jitter_factor;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_millis((base_ms + jitter).max(1.0) as u64)
    }

    fn record_transition(&self, state: &str) {
        CIRCUIT_TRANSITIONS
            .with_label_values(&[&self.endpoint.to_string(), state])
            .inc();
    }
}

/// Permission to make one call through the breaker. For half-open probes the
/// exclusive probe slot is held by this permit until it resolves; dropping an
/// unresolved permit counts as a failure so an abandoned probe cannot wedge
/// the slot or prematurely close the circuit.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    resolved: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self { breaker, probe, resolved: false }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_result(self.probe, true);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_result(self.probe, false);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_result(self.probe, false);
        }
    }
}

/// Shared registry handing out one breaker per endpoint key.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<EndpointId, Arc<CircuitBreaker>>,
    settings: Arc<ResilienceSettings>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: Arc<ResilienceSettings>) -> Self {
        Self { breakers: DashMap::new(), settings }
    }

    pub fn breaker(&self, endpoint: &EndpointId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(endpoint.clone(), self.settings.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainId;

    fn settings() -> Arc<ResilienceSettings> {
        Arc::new(ResilienceSettings {
            failure_threshold: 3,
            open_cooldown_ms: 50,
            max_backoff_multiplier: 4,
            jitter_factor: 0.0,
            ..ResilienceSettings::default()
        })
    }

    fn breaker() -> Arc<CircuitBreaker> {
        let registry = CircuitBreakerRegistry::new(settings());
        registry.breaker(&EndpointId::execution(ChainId(1)))
    }

    #[tokio::test]
    async fn opens_after_threshold_and_admits_single_probe() {
        let b = breaker();
        for _ in 0..3 {
            b.try_acquire().unwrap().fail();
        }
        assert_eq!(b.snapshot().state, BreakerState::Open);
        assert!(matches!(b.try_acquire(), Err(CircuitError::Open { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // First caller after cooldown becomes the probe.
        let probe = b.try_acquire().unwrap();
        assert!(probe.is_probe());
        // While the probe is unresolved, everyone else is rejected.
        assert!(matches!(b.try_acquire(), Err(CircuitError::ProbeInFlight { .. })));
        assert!(matches!(b.try_acquire(), Err(CircuitError::ProbeInFlight { .. })));

        probe.succeed();
        assert_eq!(b.snapshot().state, BreakerState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn failed_probe_reopens_with_escalated_cooldown() {
        let b = breaker();
        for _ in 0..3 {
            b.try_acquire().unwrap().fail();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        b.try_acquire().unwrap().fail();

        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.trips, 2);
        // Cooldown doubled: a caller right away is still rejected after the
        // base cooldown alone.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(b.try_acquire(), Err(CircuitError::Open { .. })));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.try_acquire().unwrap().is_probe());
    }

    #[tokio::test]
    async fn dropped_probe_counts_as_failure() {
        let b = breaker();
        for _ in 0..3 {
            b.try_acquire().unwrap().fail();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        {
            let _probe = b.try_acquire().unwrap();
            // Dropped without resolution.
        }
        assert_eq!(b.snapshot().state, BreakerState::Open);
        assert!(!b.snapshot().probe_in_flight);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let b = breaker();
        b.try_acquire().unwrap().fail();
        b.try_acquire().unwrap().fail();
        b.try_acquire().unwrap().succeed();
        b.try_acquire().unwrap().fail();
        b.try_acquire().unwrap().fail();
        assert_eq!(b.snapshot().state, BreakerState::Closed);
    }
}
