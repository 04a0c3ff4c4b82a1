// src/metrics.rs

//! # Global Metrics Registry
//!
//! Defines and registers all Prometheus metrics in one place so the
//! observability surface has a single point of reference. Every DLQ capture,
//! circuit-breaker OPEN transition and nonce-exhaustion event is a labeled
//! counter here, not only a log line.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::info;
use warp::{Filter, Reply};

pub static OPPORTUNITIES_DETECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_opportunities_detected_total",
        "Opportunities detected, by chain and kind",
        &["chain", "kind"]
    )
    .expect("metric registration")
});

pub static OPPORTUNITIES_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "omniarb_opportunities_published_total",
        "Opportunities published to the broker topic"
    )
    .expect("metric registration")
});

pub static OPPORTUNITIES_EXPIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_opportunities_expired_total",
        "Opportunities dropped on expiry, by pipeline stage",
        &["stage"]
    )
    .expect("metric registration")
});

pub static SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_submissions_total",
        "Execution submissions, by chain and outcome",
        &["chain", "outcome"]
    )
    .expect("metric registration")
});

pub static PRICE_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_price_updates_total",
        "Price updates applied to the book, by chain and disposition",
        &["chain", "disposition"]
    )
    .expect("metric registration")
});

pub static VALIDATION_REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_validation_rejects_total",
        "Malformed inputs rejected before arithmetic, by component",
        &["component"]
    )
    .expect("metric registration")
});

pub static CIRCUIT_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_circuit_transitions_total",
        "Circuit breaker state transitions, by endpoint and new state",
        &["endpoint", "state"]
    )
    .expect("metric registration")
});

pub static NONCE_EXHAUSTION: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_nonce_exhaustion_total",
        "Nonce acquisitions refused due to max-pending backpressure, by chain",
        &["chain"]
    )
    .expect("metric registration")
});

pub static DLQ_CAPTURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_dlq_captures_total",
        "Operations captured into the dead-letter queue, by kind",
        &["kind"]
    )
    .expect("metric registration")
});

pub static DLQ_REPLAYS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_dlq_replays_total",
        "DLQ replay attempts, by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

pub static BRIDGE_PRICE_REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "omniarb_bridge_price_rejects_total",
        "Native-price refreshes rejected by the sanity bound, by chain",
        &["chain"]
    )
    .expect("metric registration")
});

pub static DETECTION_CYCLE_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "omniarb_detection_cycle_ms",
        "Wall time of one detection cycle, by chain and scan depth",
        &["chain", "depth"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 25.0, 100.0]
    )
    .expect("metric registration")
});

/// Serves the Prometheus text exposition endpoint at `/metrics`.
pub fn serve_metrics(addr: SocketAddr) -> JoinHandle<()> {
    let route = warp::path("metrics").map(|| {
        let encoder = prometheus::TextEncoder::new();
        let families = prometheus::gather();
        match encoder.encode_to_string(&families) {
            Ok(body) => warp::reply::with_header(body, "content-type", "text/plain; version=0.0.4")
                .into_response(),
            Err(e) => warp::reply::with_status(
                format!("encode error: {e}"),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response(),
        }
    });
    info!(%addr, "Serving Prometheus metrics");
    tokio::spawn(warp::serve(route).run(addr))
}
