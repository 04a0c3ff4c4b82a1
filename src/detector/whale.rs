// src/detector/whale.rs

//! # Whale Flow Tracker
//!
//! Accumulates large-trade flow per `(chain, asset)` so the confidence scorer
//! can bias candidates aligned with recent whale buying pressure. Flows decay
//! by TTL; a whale trade from five minutes ago says nothing about the next
//! block.
//!
//! Asset matching is exact `Asset` equality. "ETH" flow never biases a "WETH"
//! candidate; if the ingestion layer considers them fungible it must normalize
//! before this boundary.

use crate::confidence::WhaleSignal;
use crate::errors::ValidationError;
use crate::types::{Asset, ChainId, SwapEvent};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct FlowStat {
    usd: f64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct WhaleTracker {
    flows: DashMap<(u64, Asset), FlowStat>,
    ttl: Duration,
}

impl WhaleTracker {
    pub fn new(ttl: Duration) -> Self {
        Self { flows: DashMap::new(), ttl }
    }

    /// Records a swap if it clears the chain's whale threshold. Flow is
    /// attributed to the asset being bought (`token_out`).
    pub fn record(&self, swap: &SwapEvent, threshold_usd: f64) -> Result<bool, ValidationError> {
        if !swap.usd_value.is_finite() || swap.usd_value < 0.0 {
            return Err(ValidationError::NonFiniteUsd(swap.token_out.clone()));
        }
        if swap.usd_value < threshold_usd {
            return Ok(false);
        }
        let key = (swap.chain.0, swap.token_out.clone());
        let now = Instant::now();
        let mut entry = self.flows.entry(key).or_insert(FlowStat { usd: 0.0, last_seen: now });
        // Restart accumulation if the previous flow has aged out.
        if now.duration_since(entry.last_seen) >= self.ttl {
            entry.usd = 0.0;
        }
        entry.usd += swap.usd_value;
        entry.last_seen = now;
        info!(
            chain = %swap.chain,
            asset = %swap.token_out,
            trade_usd = swap.usd_value,
            accumulated_usd = entry.usd,
            tx = %swap.tx_hash,
            "Whale flow recorded"
        );
        Ok(true)
    }

    /// Live whale flow aligned with `asset`, if any remains within the TTL.
    pub fn signal(&self, chain: ChainId, asset: &Asset) -> Option<WhaleSignal> {
        let entry = self.flows.get(&(chain.0, asset.clone()))?;
        if entry.last_seen.elapsed() >= self.ttl {
            return None;
        }
        Some(WhaleSignal { asset: asset.clone(), flow_usd: entry.usd })
    }

    /// Drops aged-out flows. Called from the detector's housekeeping tick.
    pub fn prune(&self) {
        let before = self.flows.len();
        self.flows.retain(|_, stat| stat.last_seen.elapsed() < self.ttl);
        let removed = before - self.flows.len();
        if removed > 0 {
            debug!(removed, "Pruned expired whale flows");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DexId;
    use ethers::types::{H256, U256};

    fn swap(token_out: &str, usd: f64) -> SwapEvent {
        SwapEvent {
            chain: ChainId(1),
            dex: DexId::new("uni"),
            token_in: Asset::new("USDC"),
            token_out: Asset::new(token_out),
            amount_in: U256::from(1_000_000u64),
            usd_value: usd,
            sequence: 1,
            tx_hash: H256::repeat_byte(0xab),
            observed_at: Instant::now(),
        }
    }

    #[test]
    fn below_threshold_trades_are_ignored() {
        let t = WhaleTracker::new(Duration::from_secs(60));
        assert!(!t.record(&swap("WETH", 10_000.0), 250_000.0).unwrap());
        assert!(t.signal(ChainId(1), &Asset::new("WETH")).is_none());
    }

    #[test]
    fn flow_accumulates_per_asset() {
        let t = WhaleTracker::new(Duration::from_secs(60));
        t.record(&swap("WETH", 300_000.0), 250_000.0).unwrap();
        t.record(&swap("WETH", 400_000.0), 250_000.0).unwrap();
        let sig = t.signal(ChainId(1), &Asset::new("WETH")).unwrap();
        assert!((sig.flow_usd - 700_000.0).abs() < 1e-6);
    }

    #[test]
    fn matching_is_exact_asset_identity() {
        let t = WhaleTracker::new(Duration::from_secs(60));
        t.record(&swap("ETH", 500_000.0), 250_000.0).unwrap();
        assert!(t.signal(ChainId(1), &Asset::new("WETH")).is_none());
        assert!(t.signal(ChainId(1), &Asset::new("ETH")).is_some());
        // A different chain sees nothing either.
        assert!(t.signal(ChainId(42161), &Asset::new("ETH")).is_none());
    }

    #[test]
    fn non_finite_notional_is_rejected() {
        let t = WhaleTracker::new(Duration::from_secs(60));
        let err = t.record(&swap("WETH", f64::NAN), 250_000.0).unwrap_err();
        assert!(matches!(err, ValidationError::NonFiniteUsd(_)));
        let err = t.record(&swap("WETH", -5.0), 250_000.0).unwrap_err();
        assert!(matches!(err, ValidationError::NonFiniteUsd(_)));
    }

    #[test]
    fn expired_flow_yields_no_signal() {
        let t = WhaleTracker::new(Duration::ZERO);
        t.record(&swap("WETH", 500_000.0), 250_000.0).unwrap();
        assert!(t.signal(ChainId(1), &Asset::new("WETH")).is_none());
        t.prune();
    }
}
