// src/lib.rs

//! # omniarb
//!
//! Off-chain core of a multi-chain arbitrage platform: opportunity detection
//! over normalized market events, bridge cost estimation, confidence scoring,
//! nonce allocation, circuit breaking, dead-lettering and execution
//! submission. Venue protocols and broker transports live behind traits
//! (`MarketEventStream`, `OpportunityPublisher`, `ExecutionClient`,
//! `NativePriceSource`); this crate owns everything between them.

pub mod bridge;
pub mod circuit;
pub mod confidence;
pub mod config;
pub mod detector;
pub mod dlq;
pub mod errors;
pub mod metrics;
pub mod nonce;
pub mod predict;
pub mod stream;
pub mod submitter;
pub mod types;

pub use bridge::{BridgeCostEstimator, HttpPriceSource, NativePriceSource};
pub use circuit::{BreakerState, CallPermit, CircuitBreaker, CircuitBreakerRegistry};
pub use confidence::{BaseSignal, ConfidenceScorer, WhaleSignal};
pub use config::Config;
pub use detector::{DetectorEngine, PriceBook, WhaleTracker};
pub use dlq::{DeadLetterQueue, DlqStore, InMemoryDlqStore, PostgresDlqStore, ReplayOutcome};
pub use errors::CoreError;
pub use nonce::{ChainNonceSource, NonceManager, RpcNonceSource, StaticNonceSource};
pub use predict::{LatencyModel, RouteKey};
pub use stream::{BroadcastPublisher, ChannelEventStream, MarketEventStream, OpportunityPublisher};
pub use submitter::{ExecutionClient, ExecutionSubmitter, HttpExecutionClient};
pub use types::{
    Asset, BridgeEstimate, ChainId, DexId, DlqEntry, EndpointId, LeaseState, MarketEvent,
    NonceLease, Opportunity, OpportunityKind, OpportunityLeg, PairKey, PriceUpdate, SwapEvent,
    OPPORTUNITY_SCHEMA_VERSION,
};
