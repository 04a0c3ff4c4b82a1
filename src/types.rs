// src/types.rs

//! # Core Data Model
//!
//! Shared types for the detection and execution pipeline. Everything that
//! crosses a component boundary lives here so that the detector, the bridge
//! estimator, the nonce manager and the submitter agree on one vocabulary.
//!
//! Unit discipline: token amounts are `U256` in the token's smallest
//! denomination, prices are `rust_decimal::Decimal` in human units
//! (quote-per-base), and `f64` appears only for USD display values and
//! scores. `Opportunity::net_profit` in quote smallest-denomination units is
//! the single canonical profit figure passed downstream.

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Version stamped on every published [`Opportunity`]. Downstream consumers
/// are expected to check it; bump on any wire-visible schema change.
pub const OPPORTUNITY_SCHEMA_VERSION: u16 = 2;

//================================================================================================//
//                                        IDENTITY TYPES                                          //
//================================================================================================//

/// A chain identifier (EVM chain id or an analogous numeric id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A DEX venue identifier, e.g. `"uniswap_v3"`. Venue ids come from the
/// normalized ingestion feed and are opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DexId(pub String);

impl DexId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for DexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical asset identity, e.g. `"WETH"`.
///
/// Whale-flow matching and cross-chain pair matching compare whole `Asset`
/// values with `Eq`; there is deliberately no substring or prefix matching
/// anywhere ("ETH" must never match "WETH").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(pub String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canonical trading pair: `base` priced in `quote`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub base: Asset,
    pub quote: Asset,
}

impl PairKey {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self { base: Asset::new(base), quote: Asset::new(quote) }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Key identifying a downstream endpoint for circuit-breaking purposes,
/// e.g. the execution RPC of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub chain: ChainId,
    pub provider: String,
}

impl EndpointId {
    pub fn execution(chain: ChainId) -> Self {
        Self { chain, provider: "execution".to_string() }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}/{}", self.chain, self.provider)
    }
}

//================================================================================================//
//                                         EVENT TYPES                                            //
//================================================================================================//

fn instant_now() -> Instant {
    Instant::now()
}

/// A normalized price observation for one `(chain, dex, pair)` key.
///
/// Keyed latest-wins by `sequence` (block number or slot); a superseded entry
/// is replaced wholesale, never mutated in place (the price book stores
/// `Arc<PriceUpdate>` and swaps the pointer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub chain: ChainId,
    pub dex: DexId,
    pub pair: PairKey,
    /// Quote units per one base unit, human denomination.
    pub price: Decimal,
    /// Available depth in base smallest-denomination units.
    pub liquidity: U256,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Pool fee in basis points; `0` means unknown (per-chain fallback applies).
    pub fee_bps: u32,
    /// Block number or slot. Out-of-order arrivals are resolved by this field,
    /// never by arrival time.
    pub sequence: u64,
    /// Monotonic receipt time, set locally; not part of the wire format.
    #[serde(skip, default = "instant_now")]
    pub observed_at: Instant,
}

impl PriceUpdate {
    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }
}

/// A normalized swap observed on some venue; feeds whale detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub chain: ChainId,
    pub dex: DexId,
    pub token_in: Asset,
    pub token_out: Asset,
    pub amount_in: U256,
    /// USD notional of the trade as estimated by the ingestion layer.
    pub usd_value: f64,
    pub sequence: u64,
    pub tx_hash: H256,
    #[serde(skip, default = "instant_now")]
    pub observed_at: Instant,
}

/// Event envelope delivered by the ingestion boundary. Delivery is
/// at-least-once; the detector is idempotent per `(chain, dex, pair, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    Price(PriceUpdate),
    Swap(SwapEvent),
}

impl MarketEvent {
    pub fn chain(&self) -> ChainId {
        match self {
            MarketEvent::Price(p) => p.chain,
            MarketEvent::Swap(s) => s.chain,
        }
    }
}

//================================================================================================//
//                                      OPPORTUNITY TYPES                                         //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpportunityKind {
    /// Multi-leg cycle on a single chain.
    IntraChain,
    /// Two-leg spread between venues on the same chain.
    CrossDex,
    /// Buy on one chain, bridge, sell on another.
    CrossChain,
    /// A spread whose confidence was materially driven by whale flow.
    WhaleInduced,
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpportunityKind::IntraChain => "intra_chain",
            OpportunityKind::CrossDex => "cross_dex",
            OpportunityKind::CrossChain => "cross_chain",
            OpportunityKind::WhaleInduced => "whale_induced",
        };
        f.write_str(s)
    }
}

/// One swap within an opportunity: `token_in` → `token_out` on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub chain: ChainId,
    pub dex: DexId,
    pub token_in: Asset,
    pub token_out: Asset,
    /// Input amount in `token_in` smallest-denomination units.
    pub amount_in: U256,
}

/// A vetted, time-bounded arbitrage candidate. Immutable once constructed;
/// a superseding detection produces a new `Opportunity` with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub kind: OpportunityKind,
    pub legs: Vec<OpportunityLeg>,
    /// Spread before costs, in `profit_asset` smallest units. Observability only.
    pub gross_profit: U256,
    /// DEX fees across all legs, in `profit_asset` smallest units.
    pub fee_cost: U256,
    /// Bridge cost converted to `profit_asset` smallest units; cross-chain only.
    pub bridge_cost: Option<U256>,
    /// Canonical downstream profit figure: gross minus all costs, in
    /// `profit_asset` smallest units.
    pub net_profit: U256,
    pub profit_asset: Asset,
    pub profit_decimals: u8,
    /// Fused confidence in `[0, 1]`.
    pub confidence: f64,
    /// Wall-clock deadline (unix ms); an opportunity past this instant is
    /// dropped, never submitted.
    pub deadline_unix_ms: u64,
    pub detected_at_unix_ms: u64,
    pub schema_version: u16,
}

impl Opportunity {
    pub fn is_expired(&self, now_unix_ms: u64) -> bool {
        now_unix_ms >= self.deadline_unix_ms
    }

    /// Source chain of the first leg; the submitter executes from here.
    pub fn source_chain(&self) -> Option<ChainId> {
        self.legs.first().map(|l| l.chain)
    }
}

//================================================================================================//
//                                    EXECUTION-SIDE TYPES                                        //
//================================================================================================//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    Pending,
    Confirmed,
    Released,
    Expired,
}

/// A nonce handed out by the nonce manager. Exactly one `Pending` lease may
/// exist for a given `(chain, address, nonce)` at a time.
#[derive(Debug, Clone)]
pub struct NonceLease {
    pub chain: ChainId,
    pub address: Address,
    pub nonce: u64,
    pub state: LeaseState,
    pub issued_at: Instant,
}

/// Cost and latency estimate for one bridge transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEstimate {
    pub usd_cost: f64,
    pub eta: Duration,
}

/// A terminally failed operation captured for replay. `payload` is the
/// complete original operation, not a projection; `retry_count` is durable
/// state owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub operation_id: Uuid,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_error: String,
}

//================================================================================================//
//                                        UNIT HELPERS                                            //
//================================================================================================//

/// Current wall-clock time as unix milliseconds.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts a human-denominated `Decimal` amount into smallest-denomination
/// units. Returns `None` for negative values or on overflow; callers treat
/// that as a validation failure, never as zero.
pub fn decimal_to_units(value: Decimal, decimals: u8) -> Option<U256> {
    if value.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from(10u128.checked_pow(decimals as u32)?);
    let scaled = value.checked_mul(scale)?;
    scaled.trunc().to_u128().map(U256::from)
}

/// Converts smallest-denomination units into a human-denominated `Decimal`.
/// Returns `None` if the amount exceeds `Decimal` range (96-bit mantissa),
/// which is well below `U256`'s; callers treat `None` as a rejected leg.
pub fn units_to_decimal(amount: U256, decimals: u8) -> Option<Decimal> {
    if amount > U256::from(u128::MAX) {
        return None;
    }
    let raw = i128::try_from(amount.as_u128()).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals as u32).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decimal_units_round_trip() {
        let amount = Decimal::from_str("10.5").unwrap();
        let units = decimal_to_units(amount, 18).unwrap();
        assert_eq!(units, U256::from(10_500_000_000_000_000_000u128));
        assert_eq!(units_to_decimal(units, 18).unwrap(), amount);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(decimal_to_units(Decimal::from_str("-1").unwrap(), 6).is_none());
    }

    #[test]
    fn oversized_unit_amounts_convert_to_none_not_panic() {
        // 1e30 fits in u128 but exceeds Decimal's 96-bit mantissa.
        assert!(units_to_decimal(U256::exp10(30), 18).is_none());
        // Just inside the mantissa still converts.
        assert!(units_to_decimal(U256::exp10(28), 18).is_some());
        // Beyond u128 entirely.
        assert!(units_to_decimal(U256::from(u128::MAX) + U256::one(), 18).is_none());
    }

    #[test]
    fn asset_identity_is_exact() {
        assert_ne!(Asset::new("ETH"), Asset::new("WETH"));
        assert_ne!(Asset::new("ETH"), Asset::new("ETH "));
        assert_eq!(Asset::new("WETH"), Asset::new("WETH"));
    }

    #[test]
    fn opportunity_expiry_uses_wall_clock_deadline() {
        let opp = Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::CrossDex,
            legs: vec![],
            gross_profit: U256::zero(),
            fee_cost: U256::zero(),
            bridge_cost: None,
            net_profit: U256::zero(),
            profit_asset: Asset::new("USDC"),
            profit_decimals: 6,
            confidence: 0.5,
            deadline_unix_ms: 1_000,
            detected_at_unix_ms: 500,
            schema_version: OPPORTUNITY_SCHEMA_VERSION,
        };
        assert!(!opp.is_expired(999));
        assert!(opp.is_expired(1_000));
        assert!(opp.is_expired(2_000));
    }
}
