// src/bridge.rs

//! # Bridge Cost Estimator
//!
//! Estimates the USD cost and latency of moving an asset between chains.
//! Mostly pure given its inputs; the one piece of mutable state is a
//! short-lived cache of native-asset USD prices, refreshed on demand through
//! a [`NativePriceSource`].
//!
//! Two fail-safes from hard-won production lessons:
//! - a refreshed native price outside a plausible multiple of the last sane
//!   value is rejected and the last sane value retained, so one poisoned
//!   upstream reading cannot produce 10–1000× cost errors;
//! - chains and routes without explicit configuration fail closed
//!   (`UnsupportedChain` / `UnsupportedRoute`); there is no default fee model
//!   to fall back to, because defaults tuned for one chain's economics are
//!   wrong by orders of magnitude on another.

use crate::config::Config;
use crate::errors::BridgeError;
use crate::metrics::BRIDGE_PRICE_REJECTS;
use crate::predict::{LatencyModel, RouteKey};
use crate::types::{Asset, BridgeEstimate, ChainId};
use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of live native-asset USD prices, one per chain.
#[async_trait]
pub trait NativePriceSource: Send + Sync + std::fmt::Debug {
    async fn native_usd(&self, chain: ChainId) -> Result<f64, BridgeError>;
}

/// HTTP implementation querying a price API endpoint.
#[derive(Debug)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(serde::Deserialize)]
struct PriceResponse {
    usd: f64,
}

impl HttpPriceSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::PriceSourceUnavailable(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl NativePriceSource for HttpPriceSource {
    async fn native_usd(&self, chain: ChainId) -> Result<f64, BridgeError> {
        let url = format!("{}/native-price/{}", self.endpoint, chain);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::PriceSourceUnavailable(format!("{url}: {e}")))?;
        let parsed: PriceResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::PriceSourceUnavailable(format!("{url}: {e}")))?;
        if !parsed.usd.is_finite() || parsed.usd <= 0.0 {
            return Err(BridgeError::PriceSourceUnavailable(format!(
                "{url}: non-positive price {}",
                parsed.usd
            )));
        }
        Ok(parsed.usd)
    }
}

/// Estimates bridge transfer costs and latencies across configured routes.
pub struct BridgeCostEstimator {
    config: Arc<Config>,
    source: Arc<dyn NativePriceSource>,
    model: Arc<LatencyModel>,
    price_cache: Cache<u64, f64>,
    last_sane: DashMap<u64, f64>,
}

impl std::fmt::Debug for BridgeCostEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeCostEstimator")
            .field("cached_prices", &self.price_cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl BridgeCostEstimator {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn NativePriceSource>,
        model: Arc<LatencyModel>,
    ) -> Self {
        let ttl = Duration::from_secs(config.bridge.native_price_ttl_secs.max(1));
        Self {
            config,
            source,
            model,
            price_cache: Cache::builder().time_to_live(ttl).max_capacity(256).build(),
            last_sane: DashMap::new(),
        }
    }

    /// Estimates the cost of bridging `asset` worth `amount_usd` from `src`
    /// to `dst`. Unknown chains and unconfigured routes fail closed.
    pub async fn estimate(
        &self,
        src: ChainId,
        dst: ChainId,
        asset: &Asset,
        amount_usd: f64,
    ) -> Result<BridgeEstimate, BridgeError> {
        let src_settings =
            self.config.chain(src).map_err(|_| BridgeError::UnsupportedChain(src))?;
        let dst_settings =
            self.config.chain(dst).map_err(|_| BridgeError::UnsupportedChain(dst))?;
        let route = self
            .config
            .bridge
            .route(src, dst)
            .ok_or(BridgeError::UnsupportedRoute { src, dst })?;

        if !amount_usd.is_finite() || amount_usd < 0.0 {
            return Err(BridgeError::PriceSourceUnavailable(format!(
                "non-finite bridge notional {amount_usd}"
            )));
        }

        let mut usd_cost = route.base_cost_usd + amount_usd * route.fee_bps as f64 / 10_000.0;
        if route.src_native_spend > 0.0 {
            usd_cost += route.src_native_spend * self.native_price(src).await?;
        }
        if route.dst_native_spend > 0.0 {
            usd_cost += route.dst_native_spend * self.native_price(dst).await?;
        }

        let eta = self.model.eta(RouteKey { src, dst }, route.base_latency_ms);
        debug!(
            %src,
            %dst,
            asset = %asset,
            amount_usd,
            usd_cost,
            eta_ms = eta.as_millis() as u64,
            src_native = %src_settings.native_asset,
            dst_native = %dst_settings.native_asset,
            "Bridge estimate"
        );
        Ok(BridgeEstimate { usd_cost, eta })
    }

    /// Cached native-asset USD price with the sanity bound applied on refresh.
    pub async fn native_price(&self, chain: ChainId) -> Result<f64, BridgeError> {
        let fetched = self
            .price_cache
            .try_get_with(chain.0, async {
                let raw = self.source.native_usd(chain).await?;
                Ok::<f64, BridgeError>(self.sanitize(chain, raw))
            })
            .await
            .map_err(|e: Arc<BridgeError>| BridgeError::PriceSourceUnavailable(e.to_string()))?;
        Ok(fetched)
    }

    /// Applies the plausibility bound against the last sane observation.
    /// An implausible reading is dropped and the last sane value retained.
    fn sanitize(&self, chain: ChainId, observed: f64) -> f64 {
        let factor = self.config.bridge.price_sanity_factor;
        match self.last_sane.get(&chain.0).map(|v| *v) {
            Some(last) if observed > last * factor || observed < last / factor => {
                warn!(
                    %chain,
                    observed,
                    last,
                    factor,
                    "Rejecting implausible native price refresh; retaining last sane value"
                );
                BRIDGE_PRICE_REJECTS.with_label_values(&[&chain.to_string()]).inc();
                last
            }
            _ => {
                self.last_sane.insert(chain.0, observed);
                observed
            }
        }
    }
}
