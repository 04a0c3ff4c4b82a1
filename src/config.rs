// src/config.rs

//! # Modular Configuration System
//!
//! Loads settings from a JSON file into one `Config` struct that acts as the
//! single source of truth for all tunables. The `Config` is constructed once
//! at startup and injected (`Arc<Config>`) everywhere; no module re-declares
//! its own defaults locally.
//!
//! Per-chain lookups fail closed: consulting an unconfigured chain returns
//! `ConfigError::UnknownChain` rather than silently borrowing another chain's
//! economics.

use crate::errors::ConfigError;
use crate::types::{Asset, ChainId};
use ethers::types::Address;
use eyre::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-chain tunables keyed by chain id. Every chain the core touches
    /// must appear here.
    pub chains: HashMap<u64, ChainSettings>,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub confidence: ConfidenceSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

impl Config {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from JSON: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-closed per-chain lookup.
    pub fn chain(&self, chain: ChainId) -> Result<&ChainSettings, ConfigError> {
        self.chains.get(&chain.0).ok_or(ConfigError::UnknownChain(chain))
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.chains.keys().copied().map(ChainId).collect();
        ids.sort();
        ids
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.price_sanity_factor <= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "bridge.price_sanity_factor".to_string(),
                reason: format!("must be > 1.0, got {}", self.bridge.price_sanity_factor),
            });
        }
        if self.confidence.max_composed_boost < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "confidence.max_composed_boost".to_string(),
                reason: format!("must be >= 1.0, got {}", self.confidence.max_composed_boost),
            });
        }
        if self.detector.max_trade_base <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "detector.max_trade_base".to_string(),
                reason: format!("must be positive, got {}", self.detector.max_trade_base),
            });
        }
        if !(0.0..=0.5).contains(&self.resilience.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "resilience.jitter_factor".to_string(),
                reason: format!("must be within [0, 0.5], got {}", self.resilience.jitter_factor),
            });
        }
        for (id, chain) in &self.chains {
            if *id != chain.chain_id {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{id}.chain_id"),
                    reason: format!("key {id} does not match declared chain_id {}", chain.chain_id),
                });
            }
            if chain.quote_usd_rate <= 0.0 || !chain.quote_usd_rate.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{id}.quote_usd_rate"),
                    reason: format!("must be finite and positive, got {}", chain.quote_usd_rate),
                });
            }
            if chain.fee_fallback_bps > 10_000 {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{id}.fee_fallback_bps"),
                    reason: format!("must be at most 10000, got {}", chain.fee_fallback_bps),
                });
            }
            if chain.max_pending_nonces == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{id}.max_pending_nonces"),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

//================================================================================================//
//                                      Per-Chain Settings                                        //
//================================================================================================//

/// Tunables that are economic per chain. There is intentionally no
/// `Default` impl: every chain must be configured explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub chain_name: String,
    /// JSON-RPC endpoint used for nonce synchronization.
    pub rpc_url: String,
    /// The chain's canonical quote asset, in which profit is denominated.
    pub quote_asset: Asset,
    pub quote_decimals: u8,
    /// USD per one quote unit (≈ 1.0 for stablecoin quotes). Used only when
    /// crossing the USD boundary (bridge costs, whale thresholds).
    pub quote_usd_rate: f64,
    /// Minimum net profit to emit an opportunity, in human quote units.
    pub min_profit: Decimal,
    /// Reject price legs older than this.
    pub staleness_window_ms: u64,
    /// DEX fee fallback (bps) when an update carries no pool fee.
    pub fee_fallback_bps: u32,
    /// Opportunity time-to-live from detection to submission deadline.
    pub opportunity_ttl_ms: u64,
    /// Trades at or above this USD notional are classified as whale flow.
    pub whale_threshold_usd: f64,
    /// Hard cap on concurrently pending nonce leases per account.
    pub max_pending_nonces: usize,
    /// Address the submitter executes from on this chain.
    pub executor_address: Address,
    pub native_asset: Asset,
    pub native_decimals: u8,
}

//================================================================================================//
//                                      Module Settings                                           //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Minimum interval between full multi-hop scans of one pair. Two-leg
    /// checks run on every update; the combinatorial search does not.
    pub deep_scan_interval_ms: u64,
    /// Cap on base-unit trade size considered per opportunity (human units).
    pub max_trade_base: Decimal,
    /// Buffer size of the per-chain event channel.
    pub event_channel_capacity: usize,
    /// Whale flows older than this no longer bias confidence.
    pub whale_flow_ttl_ms: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            deep_scan_interval_ms: 500,
            max_trade_base: Decimal::new(1_000, 0),
            event_channel_capacity: 4_096,
            whale_flow_ttl_ms: 60_000,
        }
    }
}

/// Confidence tuning constants. Declared exactly once and injected; callers
/// never re-declare these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceSettings {
    /// Spread (bps) at which the base signal reaches half strength.
    pub spread_half_score_bps: f64,
    /// Multiplier applied when aligned whale flow is present.
    pub whale_boost: f64,
    /// Weight of the ML prediction's deviation from neutral (0.5).
    pub ml_weight: f64,
    /// Hard cap on the composed boost multiplier (whale × ML).
    pub max_composed_boost: f64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            spread_half_score_bps: 20.0,
            whale_boost: 1.2,
            ml_weight: 0.4,
            max_composed_boost: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// A refreshed native price outside `[last/k, last*k]` is rejected.
    pub price_sanity_factor: f64,
    pub native_price_ttl_secs: u64,
    /// Latency observations above this are rejected as implausible.
    pub max_plausible_latency_ms: u64,
    /// Per-caller rate limit for the bridge telemetry feedback channel.
    pub feedback_updates_per_sec: u32,
    /// Supported routes keyed `"src->dst"` by chain id. Routes absent here
    /// are unsupported and fail closed.
    pub routes: HashMap<String, BridgeRouteSettings>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            price_sanity_factor: 5.0,
            native_price_ttl_secs: 30,
            max_plausible_latency_ms: 3_600_000,
            feedback_updates_per_sec: 5,
            routes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRouteSettings {
    /// Fixed protocol fee, USD.
    pub base_cost_usd: f64,
    /// Proportional fee on the bridged notional, bps.
    pub fee_bps: u32,
    /// Native-asset spend on the source chain (human units) for the bridge tx.
    pub src_native_spend: f64,
    /// Native-asset spend on the destination chain (human units), if any.
    pub dst_native_spend: f64,
    /// Latency prior before live observations accumulate.
    pub base_latency_ms: u64,
}

impl BridgeSettings {
    pub fn route(&self, src: ChainId, dst: ChainId) -> Option<&BridgeRouteSettings> {
        self.routes.get(&format!("{}->{}", src.0, dst.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Consecutive failures before a breaker opens.
    pub failure_threshold: u64,
    /// Base cooldown before a half-open probe is allowed.
    pub open_cooldown_ms: u64,
    /// Cooldown escalation cap after repeated failed probes.
    pub max_backoff_multiplier: u64,
    /// Jitter applied to cooldowns and retry backoff, fraction in [0, 0.5].
    pub jitter_factor: f64,
    /// Submission attempts before an operation is dead-lettered.
    pub max_submit_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_cap_ms: u64,
    /// Timeout on every external submission call.
    pub submit_timeout_ms: u64,
    /// Timeout on the on-chain nonce query during account sync and resync.
    pub nonce_sync_timeout_ms: u64,
    /// Pending nonce leases older than this are reclaimed.
    pub lease_ttl_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown_ms: 10_000,
            max_backoff_multiplier: 8,
            jitter_factor: 0.2,
            max_submit_attempts: 3,
            retry_backoff_base_ms: 200,
            retry_backoff_cap_ms: 5_000,
            submit_timeout_ms: 10_000,
            nonce_sync_timeout_ms: 5_000,
            lease_ttl_ms: 120_000,
        }
    }
}

/// Chain settings for unit tests. Kept here so every test exercises the same
/// injected configuration surface as production code.
#[cfg(test)]
pub(crate) fn test_chain_settings(id: u64) -> ChainSettings {
    ChainSettings {
        chain_id: id,
        chain_name: format!("chain-{id}"),
        rpc_url: "http://127.0.0.1:8545".to_string(),
        quote_asset: Asset::new("USDC"),
        quote_decimals: 6,
        quote_usd_rate: 1.0,
        min_profit: Decimal::new(1, 0),
        staleness_window_ms: 5_000,
        fee_fallback_bps: 30,
        opportunity_ttl_ms: 2_000,
        whale_threshold_usd: 250_000.0,
        max_pending_nonces: 16,
        executor_address: Address::repeat_byte(0x11),
        native_asset: Asset::new("ETH"),
        native_decimals: 18,
    }
}

/// A two-chain test config with a single configured bridge route.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let mut chains = HashMap::new();
    chains.insert(1, test_chain_settings(1));
    chains.insert(42161, test_chain_settings(42161));
    let mut bridge = BridgeSettings::default();
    bridge.routes.insert(
        "1->42161".to_string(),
        BridgeRouteSettings {
            base_cost_usd: 2.0,
            fee_bps: 4,
            src_native_spend: 0.001,
            dst_native_spend: 0.0,
            base_latency_ms: 90_000,
        },
    );
    Config {
        chains,
        detector: DetectorSettings::default(),
        confidence: ConfidenceSettings::default(),
        bridge,
        resilience: ResilienceSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chain(id: u64) -> ChainSettings {
        test_chain_settings(id)
    }

    #[test]
    fn unknown_chain_fails_closed() {
        let mut chains = HashMap::new();
        chains.insert(1, test_chain(1));
        let config = Config {
            chains,
            detector: DetectorSettings::default(),
            confidence: ConfidenceSettings::default(),
            bridge: BridgeSettings::default(),
            resilience: ResilienceSettings::default(),
        };
        assert!(config.chain(ChainId(1)).is_ok());
        assert!(matches!(
            config.chain(ChainId(42161)),
            Err(ConfigError::UnknownChain(ChainId(42161)))
        ));
    }

    #[test]
    fn mismatched_chain_key_is_rejected() {
        let mut chains = HashMap::new();
        chains.insert(7, test_chain(8));
        let config = Config {
            chains,
            detector: DetectorSettings::default(),
            confidence: ConfidenceSettings::default(),
            bridge: BridgeSettings::default(),
            resilience: ResilienceSettings::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn trade_cap_and_fallback_fee_are_bounded() {
        let mut config = test_config();
        config.detector.max_trade_base = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.chains.get_mut(&1).unwrap().fee_fallback_bps = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sanity_factor_must_exceed_one() {
        let mut config = Config {
            chains: HashMap::new(),
            detector: DetectorSettings::default(),
            confidence: ConfidenceSettings::default(),
            bridge: BridgeSettings::default(),
            resilience: ResilienceSettings::default(),
        };
        config.bridge.price_sanity_factor = 1.0;
        assert!(config.validate().is_err());
    }
}
