// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use ethers::types::{Address, U256};
use omniarb::config::{
    BridgeRouteSettings, BridgeSettings, ChainSettings, Config, ConfidenceSettings,
    DetectorSettings, ResilienceSettings,
};
use omniarb::errors::BridgeError;
use omniarb::types::{Asset, ChainId, DexId, PairKey, PriceUpdate};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;

pub fn chain_settings(id: u64) -> ChainSettings {
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

/// Two configured chains with one bridge route between them.
pub fn two_chain_config() -> Config {
    let mut chains = HashMap::new();
    chains.insert(1, chain_settings(1));
    chains.insert(42161, chain_settings(42161));
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
    let mut resilience = ResilienceSettings::default();
    resilience.retry_backoff_base_ms = 1;
    resilience.retry_backoff_cap_ms = 5;
    resilience.jitter_factor = 0.0;
    Config {
        chains,
        detector: DetectorSettings::default(),
        confidence: ConfidenceSettings::default(),
        bridge,
        resilience,
    }
}

/// A WETH/USDC price observation with 10 WETH of depth.
pub fn weth_usdc(dex: &str, price: i64, sequence: u64) -> PriceUpdate {
    PriceUpdate {
        chain: ChainId(1),
        dex: DexId::new(dex),
        pair: PairKey::new("WETH", "USDC"),
        price: Decimal::new(price, 0),
        liquidity: U256::from(10u64).pow(U256::from(19u64)),
        base_decimals: 18,
        quote_decimals: 6,
        fee_bps: 0,
        sequence,
        observed_at: Instant::now(),
    }
}

/// Native price source returning one fixed value for every chain.
#[derive(Debug)]
pub struct FixedPriceSource(pub f64);

#[async_trait::async_trait]
impl omniarb::bridge::NativePriceSource for FixedPriceSource {
    async fn native_usd(&self, _chain: ChainId) -> Result<f64, BridgeError> {
        Ok(self.0)
    }
}
