// src/errors.rs

//! # Centralized Error Handling
//!
//! Hierarchical, typed errors for the whole core. The taxonomy mirrors the
//! propagation policy: validation errors are rejected locally and never cross
//! a worker boundary as a panic; transient infrastructure errors are
//! retryable and routed through the circuit breaker; terminal failures end in
//! the dead-letter queue; invariant violations get their own loud variants.

use crate::types::{Asset, ChainId, EndpointId, PairKey};
use ethers::types::Address;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type encapsulating all failures within the core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Bridge estimator error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("Nonce manager error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Circuit breaker error: {0}")]
    Circuit(#[from] CircuitError),
    #[error("Dead-letter queue error: {0}")]
    Dlq(#[from] DlqError),
    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),
    #[error("Channel closed: {0}")]
    Channel(String),
    #[error("System shut down")]
    Shutdown,
}

/// Errors raised while loading or consulting configuration. An unconfigured
/// chain is always an error, never a silent fallback to another chain's
/// tunables.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration for chain {0}; refusing to substitute another chain's defaults")]
    UnknownChain(ChainId),
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Input-validation failures. These are rejected at the edge of the
/// component that observed them and never reach profit arithmetic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Non-positive price {0} for pair {1}")]
    NonPositivePrice(Decimal, PairKey),
    #[error("Price {0} for pair {1} outside plausible bounds")]
    PriceOutOfRange(Decimal, PairKey),
    #[error("Zero liquidity for pair {0}")]
    ZeroLiquidity(PairKey),
    #[error("Non-finite USD value in swap event for {0}")]
    NonFiniteUsd(Asset),
    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),
    #[error("Latency observation {observed_ms}ms outside plausible bound {max_ms}ms")]
    LatencyOutOfBounds { observed_ms: u64, max_ms: u64 },
    #[error("Feedback rate limit exceeded for caller {caller}")]
    FeedbackRateLimited { caller: String },
}

/// Errors from the opportunity detector. A failing pair evaluation is
/// isolated to that pair; unrelated pairs keep flowing.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Pair evaluation failed: {0}")]
    PairEvaluation(String),
    #[error("Unit conversion overflow: {0}")]
    UnitConversion(String),
    #[error("Publisher failed: {0}")]
    Publish(String),
}

/// Errors from the bridge cost estimator. Unknown chains and routes fail
/// closed; there is no default fee model to fall back to.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unsupported bridge route {src} -> {dst}")]
    UnsupportedRoute { src: ChainId, dst: ChainId },
    #[error("Chain {0} is not configured for bridging")]
    UnsupportedChain(ChainId),
    #[error("Native price source unavailable: {0}")]
    PriceSourceUnavailable(String),
    #[error("Implausible native price for chain {chain}: observed {observed}, last sane {last}")]
    ImplausiblePrice { chain: ChainId, observed: f64, last: f64 },
    #[error("Bridge cost fetch timed out after {0}ms")]
    Timeout(u64),
}

/// Errors from the nonce allocation manager. `Exhausted` is a hard
/// backpressure signal; `LeaseStateViolation` is an invariant violation that
/// must surface loudly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NonceError {
    #[error("Nonce pool exhausted for {address:?} on chain {chain}: {pending} pending (max {max_pending})")]
    Exhausted { chain: ChainId, address: Address, pending: usize, max_pending: usize },
    #[error("Lease state violation for nonce {nonce} ({address:?}, chain {chain}): {detail}")]
    LeaseStateViolation { chain: ChainId, address: Address, nonce: u64, detail: String },
    #[error("Failed to fetch on-chain nonce for {address:?} on chain {chain}: {reason}")]
    SyncFailed { chain: ChainId, address: Address, reason: String },
}

/// Errors from the circuit breaker registry. Neither variant is routed to
/// the protected endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError {
    #[error("Circuit open for {endpoint}; retry after ~{retry_after_ms}ms")]
    Open { endpoint: EndpointId, retry_after_ms: u64 },
    #[error("Half-open probe already in flight for {endpoint}")]
    ProbeInFlight { endpoint: EndpointId },
}

/// Errors from the dead-letter queue and its stores.
#[derive(Error, Debug)]
pub enum DlqError {
    #[error("DLQ storage error: {0}")]
    Storage(String),
    #[error("No DLQ entry for operation {0}")]
    NotFound(Uuid),
    #[error("DLQ payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_postgres::Error> for DlqError {
    fn from(e: tokio_postgres::Error) -> Self {
        DlqError::Storage(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for DlqError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DlqError::Storage(e.to_string())
    }
}

/// Errors from the execution submitter pipeline.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Opportunity {0} expired before submission")]
    Expired(Uuid),
    #[error("Execution client rejected submission: {0}")]
    Rejected(String),
    #[error("Submission timed out after {0}ms")]
    Timeout(u64),
    #[error("Execution client transport error: {0}")]
    Transport(String),
    #[error("Retries exhausted for opportunity {id} after {attempts} attempts: {last_error}")]
    RetriesExhausted { id: Uuid, attempts: u32, last_error: String },
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Circuit error: {0}")]
    Circuit(#[from] CircuitError),
    #[error("DLQ error: {0}")]
    Dlq(#[from] DlqError),
}

impl SubmitError {
    /// Transient failures worth retrying with backoff. Rejections and lease
    /// misuse are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmitError::Timeout(_)
                | SubmitError::Transport(_)
                | SubmitError::Circuit(_)
                | SubmitError::Nonce(NonceError::Exhausted { .. })
        )
    }
}
