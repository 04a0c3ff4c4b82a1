// src/detector/engine.rs

//! # Opportunity Detection Engine
//!
//! Consumes normalized market events, maintains per-chain price books and
//! emits vetted [`Opportunity`] records. Three scan depths:
//!
//! - the two-leg spread check runs on every applied price update, for the
//!   affected pair only;
//! - the triangular (multi-hop) scan is combinatorial and runs at most once
//!   per throttle interval per pair;
//! - the cross-chain scan compares the same pair on peer chains and gates on
//!   the bridge cost estimate.
//!
//! A failing pair evaluation is isolated per pair: it is logged and counted,
//! and scanning continues for every other pair. Malformed inputs are rejected
//! before any profit arithmetic runs.

use crate::bridge::BridgeCostEstimator;
use crate::confidence::{BaseSignal, ConfidenceScorer};
use crate::config::Config;
use crate::detector::price_book::{ApplyOutcome, PriceBook};
use crate::detector::whale::WhaleTracker;
use crate::errors::{DetectorError, ValidationError};
use crate::metrics::{
    DETECTION_CYCLE_MS, OPPORTUNITIES_DETECTED, PRICE_UPDATES, VALIDATION_REJECTS,
};
use crate::predict::{LatencyModel, RouteKey};
use crate::stream::{MarketEventStream, OpportunityPublisher};
use crate::types::{
    decimal_to_units, now_unix_ms, units_to_decimal, ChainId, MarketEvent, Opportunity,
    OpportunityKind, OpportunityLeg, PairKey, PriceUpdate, SwapEvent,
    OPPORTUNITY_SCHEMA_VERSION,
};
use dashmap::DashMap;
use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BPS_DENOMINATOR: u32 = 10_000;

pub struct DetectorEngine {
    config: Arc<Config>,
    scorer: ConfidenceScorer,
    whales: Arc<WhaleTracker>,
    bridge: Arc<BridgeCostEstimator>,
    model: Arc<LatencyModel>,
    publisher: Arc<dyn OpportunityPublisher>,
    books: DashMap<u64, Arc<PriceBook>>,
    last_deep_scan: DashMap<(u64, PairKey), Instant>,
}

impl DetectorEngine {
    pub fn new(
        config: Arc<Config>,
        whales: Arc<WhaleTracker>,
        bridge: Arc<BridgeCostEstimator>,
        model: Arc<LatencyModel>,
        publisher: Arc<dyn OpportunityPublisher>,
    ) -> Self {
        let scorer = ConfidenceScorer::new(Arc::new(config.confidence.clone()));
        Self {
            config,
            scorer,
            whales,
            bridge,
            model,
            publisher,
            books: DashMap::new(),
            last_deep_scan: DashMap::new(),
        }
    }

    pub fn book(&self, chain: ChainId) -> Arc<PriceBook> {
        self.books.entry(chain.0).or_insert_with(|| Arc::new(PriceBook::new())).clone()
    }

    /// Event loop: consumes the stream until it closes or shutdown is signaled.
    pub async fn run(
        &self,
        mut stream: Box<dyn MarketEventStream>,
        shutdown: CancellationToken,
    ) {
        let mut housekeeping = interval(Duration::from_secs(10));
        info!("Detection engine started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Detection engine shutting down");
                    return;
                }
                _ = housekeeping.tick() => {
                    self.whales.prune();
                }
                event = stream.next_event() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Market event stream closed; detection engine stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    pub async fn handle_event(&self, event: MarketEvent) {
        match event {
            MarketEvent::Price(update) => {
                if let Err(e) = self.on_price_update(update).await {
                    warn!(error = %e, "Price update handling failed");
                }
            }
            MarketEvent::Swap(swap) => {
                if let Err(e) = self.on_swap_event(&swap) {
                    warn!(error = %e, "Swap event rejected");
                }
            }
        }
    }

    /// Applies a price update and runs the scans it unlocks. At-least-once
    /// redelivery is absorbed here: duplicates and stale arrivals touch
    /// nothing downstream.
    pub async fn on_price_update(&self, update: PriceUpdate) -> Result<(), DetectorError> {
        let chain = update.chain;
        let settings = self
            .config
            .chain(chain)
            .map_err(|e| DetectorError::PairEvaluation(e.to_string()))?;

        if let Err(e) = validate_price_update(&update) {
            VALIDATION_REJECTS.with_label_values(&["detector"]).inc();
            warn!(%chain, dex = %update.dex, pair = %update.pair, error = %e, "Malformed price update rejected");
            return Ok(());
        }

        let pair = update.pair.clone();
        let outcome = self.book(chain).apply(update);
        PRICE_UPDATES.with_label_values(&[&chain.to_string(), outcome.as_str()]).inc();
        if outcome != ApplyOutcome::Applied {
            debug!(%chain, %pair, disposition = outcome.as_str(), "Price update not applied");
            return Ok(());
        }

        let staleness_window = Duration::from_millis(settings.staleness_window_ms);

        // Two-leg scan on every applied update, for this pair only.
        let started = Instant::now();
        if let Err(e) = self.scan_two_leg(chain, &pair, staleness_window).await {
            error!(%chain, %pair, error = %e, "Two-leg scan failed; pair isolated");
        }
        DETECTION_CYCLE_MS
            .with_label_values(&[&chain.to_string(), "two_leg"])
            .observe(started.elapsed().as_secs_f64() * 1_000.0);

        if let Err(e) = self.scan_cross_chain(chain, &pair, staleness_window).await {
            error!(%chain, %pair, error = %e, "Cross-chain scan failed; pair isolated");
        }

        // Deep scans are combinatorial; throttle per pair.
        if self.deep_scan_due(chain, &pair) {
            let started = Instant::now();
            if let Err(e) = self.scan_triangular(chain, staleness_window).await {
                error!(%chain, error = %e, "Triangular scan failed");
            }
            DETECTION_CYCLE_MS
                .with_label_values(&[&chain.to_string(), "deep"])
                .observe(started.elapsed().as_secs_f64() * 1_000.0);
        }
        Ok(())
    }

    pub fn on_swap_event(&self, swap: &SwapEvent) -> Result<(), ValidationError> {
        let threshold = match self.config.chain(swap.chain) {
            Ok(settings) => settings.whale_threshold_usd,
            Err(_) => {
                VALIDATION_REJECTS.with_label_values(&["detector"]).inc();
                warn!(chain = %swap.chain, "Swap event for unconfigured chain dropped");
                return Ok(());
            }
        };
        match self.whales.record(swap, threshold) {
            Ok(_) => Ok(()),
            Err(e) => {
                VALIDATION_REJECTS.with_label_values(&["whale"]).inc();
                Err(e)
            }
        }
    }

    fn deep_scan_due(&self, chain: ChainId, pair: &PairKey) -> bool {
        let throttle = Duration::from_millis(self.config.detector.deep_scan_interval_ms);
        let key = (chain.0, pair.clone());
        let now = Instant::now();
        let due = match self.last_deep_scan.get(&key) {
            Some(last) => now.duration_since(*last) >= throttle,
            None => true,
        };
        if due {
            self.last_deep_scan.insert(key, now);
        }
        due
    }

    //============================================================================================//
    //                                      Two-Leg Scan                                          //
    //============================================================================================//

    async fn scan_two_leg(
        &self,
        chain: ChainId,
        pair: &PairKey,
        staleness_window: Duration,
    ) -> Result<(), DetectorError> {
        let settings =
            self.config.chain(chain).map_err(|e| DetectorError::PairEvaluation(e.to_string()))?;
        let venues: Vec<_> = self
            .book(chain)
            .venues(pair)
            .into_iter()
            .filter(|v| v.age() < staleness_window)
            .collect();
        if venues.len() < 2 {
            return Ok(());
        }

        let buy = venues
            .iter()
            .min_by_key(|v| v.price)
            .ok_or_else(|| DetectorError::PairEvaluation("empty venue set".into()))?;
        let sell = venues
            .iter()
            .max_by_key(|v| v.price)
            .ok_or_else(|| DetectorError::PairEvaluation("empty venue set".into()))?;
        if sell.price <= buy.price || buy.dex == sell.dex {
            return Ok(());
        }

        let amount_base = self.trade_size(buy, sell)?;
        if amount_base <= Decimal::ZERO {
            return Ok(());
        }

        let fee_buy = effective_fee_bps(buy, settings.fee_fallback_bps);
        let fee_sell = effective_fee_bps(sell, settings.fee_fallback_bps);
        let buy_notional = amount_base
            .checked_mul(buy.price)
            .ok_or_else(|| overflow("two-leg buy notional"))?;
        let sell_notional = amount_base
            .checked_mul(sell.price)
            .ok_or_else(|| overflow("two-leg sell notional"))?;
        let gross = sell_notional - buy_notional;
        let fees = leg_fees(buy_notional, fee_buy, sell_notional, fee_sell)
            .ok_or_else(|| overflow("two-leg fees"))?;
        let net = gross - fees;
        if net < settings.min_profit {
            return Ok(());
        }

        let spread_bps = spread_bps(buy.price, sell.price);
        let max_leg_age = buy.age().max(sell.age());
        let whale = self.whales.signal(chain, &pair.base);
        let confidence = self.scorer.score(
            &BaseSignal { spread_bps, max_leg_age, staleness_window },
            whale.as_ref(),
            None,
        );
        if confidence <= 0.0 {
            return Ok(());
        }

        let kind = if whale.is_some() {
            OpportunityKind::WhaleInduced
        } else {
            OpportunityKind::CrossDex
        };
        let quote_decimals = buy.quote_decimals;
        let legs = vec![
            OpportunityLeg {
                chain,
                dex: buy.dex.clone(),
                token_in: pair.quote.clone(),
                token_out: pair.base.clone(),
                amount_in: to_units(buy_notional, quote_decimals)?,
            },
            OpportunityLeg {
                chain,
                dex: sell.dex.clone(),
                token_in: pair.base.clone(),
                token_out: pair.quote.clone(),
                amount_in: to_units(amount_base, buy.base_decimals)?,
            },
        ];

        let now_ms = now_unix_ms();
        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            kind,
            legs,
            gross_profit: to_units(gross, quote_decimals)?,
            fee_cost: to_units(fees, quote_decimals)?,
            bridge_cost: None,
            net_profit: to_units(net, quote_decimals)?,
            profit_asset: pair.quote.clone(),
            profit_decimals: quote_decimals,
            confidence,
            deadline_unix_ms: now_ms + settings.opportunity_ttl_ms,
            detected_at_unix_ms: now_ms,
            schema_version: OPPORTUNITY_SCHEMA_VERSION,
        };
        self.emit(opportunity).await
    }

    //============================================================================================//
    //                                     Cross-Chain Scan                                       //
    //============================================================================================//

    async fn scan_cross_chain(
        &self,
        src: ChainId,
        pair: &PairKey,
        staleness_window: Duration,
    ) -> Result<(), DetectorError> {
        let src_settings =
            self.config.chain(src).map_err(|e| DetectorError::PairEvaluation(e.to_string()))?;
        let src_venues: Vec<_> = self
            .book(src)
            .venues(pair)
            .into_iter()
            .filter(|v| v.age() < staleness_window)
            .collect();
        let Some(buy) = src_venues.iter().min_by_key(|v| v.price) else {
            return Ok(());
        };

        for dst in self.config.chain_ids() {
            if dst == src || self.config.bridge.route(src, dst).is_none() {
                continue;
            }
            let dst_settings = match self.config.chain(dst) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let dst_window = Duration::from_millis(dst_settings.staleness_window_ms);
            let dst_venues: Vec<_> = self
                .book(dst)
                .venues(pair)
                .into_iter()
                .filter(|v| v.age() < dst_window)
                .collect();
            let Some(sell) = dst_venues.iter().max_by_key(|v| v.price) else {
                continue;
            };
            if sell.price <= buy.price {
                continue;
            }

            let amount_base = self.trade_size(buy, sell)?;
            if amount_base <= Decimal::ZERO {
                continue;
            }

            let fee_buy = effective_fee_bps(buy, src_settings.fee_fallback_bps);
            let fee_sell = effective_fee_bps(sell, dst_settings.fee_fallback_bps);
            let buy_notional = amount_base
                .checked_mul(buy.price)
                .ok_or_else(|| overflow("cross-chain buy notional"))?;
            let sell_notional = amount_base
                .checked_mul(sell.price)
                .ok_or_else(|| overflow("cross-chain sell notional"))?;
            let gross = sell_notional - buy_notional;
            let fees = leg_fees(buy_notional, fee_buy, sell_notional, fee_sell)
                .ok_or_else(|| overflow("cross-chain fees"))?;

            let notional_usd = buy_notional.to_f64().unwrap_or(0.0) * src_settings.quote_usd_rate;
            let estimate = match self.bridge.estimate(src, dst, &pair.base, notional_usd).await {
                Ok(e) => e,
                Err(e) => {
                    debug!(%src, %dst, pair = %pair, error = %e, "Bridge estimate unavailable; route skipped");
                    continue;
                }
            };
            let bridge_cost_quote =
                Decimal::try_from(estimate.usd_cost / src_settings.quote_usd_rate)
                    .map_err(|e| DetectorError::UnitConversion(e.to_string()))?;

            // Bridge cost swallowing the gross spread means no opportunity.
            if bridge_cost_quote >= gross {
                continue;
            }
            let net = gross
                .checked_sub(fees)
                .and_then(|v| v.checked_sub(bridge_cost_quote))
                .ok_or_else(|| overflow("cross-chain net"))?;
            if net < src_settings.min_profit {
                continue;
            }

            let spread_bps = spread_bps(buy.price, sell.price);
            let route = RouteKey { src, dst };
            let ml = self.model.predict_success(route);
            let whale = self.whales.signal(src, &pair.base);
            let confidence = self.scorer.score(
                &BaseSignal {
                    spread_bps,
                    max_leg_age: buy.age().max(sell.age()),
                    staleness_window,
                },
                whale.as_ref(),
                ml,
            );
            if confidence <= 0.0 {
                continue;
            }

            let quote_decimals = buy.quote_decimals;
            let legs = vec![
                OpportunityLeg {
                    chain: src,
                    dex: buy.dex.clone(),
                    token_in: pair.quote.clone(),
                    token_out: pair.base.clone(),
                    amount_in: to_units(buy_notional, quote_decimals)?,
                },
                OpportunityLeg {
                    chain: dst,
                    dex: sell.dex.clone(),
                    token_in: pair.base.clone(),
                    token_out: pair.quote.clone(),
                    amount_in: to_units(amount_base, buy.base_decimals)?,
                },
            ];

            let now_ms = now_unix_ms();
            let opportunity = Opportunity {
                id: Uuid::new_v4(),
                kind: OpportunityKind::CrossChain,
                legs,
                gross_profit: to_units(gross, quote_decimals)?,
                fee_cost: to_units(fees, quote_decimals)?,
                bridge_cost: Some(to_units(bridge_cost_quote, quote_decimals)?),
                net_profit: to_units(net, quote_decimals)?,
                profit_asset: pair.quote.clone(),
                profit_decimals: quote_decimals,
                confidence,
                // The deadline must outlive the bridge transfer itself.
                deadline_unix_ms: now_ms
                    + src_settings.opportunity_ttl_ms
                    + estimate.eta.as_millis() as u64,
                detected_at_unix_ms: now_ms,
                schema_version: OPPORTUNITY_SCHEMA_VERSION,
            };
            self.emit(opportunity).await?;
        }
        Ok(())
    }

    //============================================================================================//
    //                                     Triangular Scan                                        //
    //============================================================================================//

    /// Bounded three-hop cycle search on one chain: quote → X → Y → quote.
    async fn scan_triangular(
        &self,
        chain: ChainId,
        staleness_window: Duration,
    ) -> Result<(), DetectorError> {
        let settings =
            self.config.chain(chain).map_err(|e| DetectorError::PairEvaluation(e.to_string()))?;
        let entries: Vec<_> = self
            .book(chain)
            .all()
            .into_iter()
            .filter(|e| e.age() < staleness_window)
            .collect();

        for first in &entries {
            // first: buy X priced in Q.
            let q = first.pair.quote.clone();
            let x = first.pair.base.clone();
            for second in &entries {
                // second: buy Y priced in X.
                if second.pair.quote != x || second.pair.base == q {
                    continue;
                }
                let y = second.pair.base.clone();
                for third in &entries {
                    // third: sell Y back into Q.
                    if third.pair.base != y || third.pair.quote != q {
                        continue;
                    }
                    if let Err(e) = self
                        .evaluate_cycle(chain, settings_min(settings), first, second, third)
                        .await
                    {
                        error!(
                            %chain,
                            cycle = %format!("{}>{}>{}", first.pair, second.pair, third.pair),
                            error = %e,
                            "Cycle evaluation failed; cycle isolated"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn evaluate_cycle(
        &self,
        chain: ChainId,
        (min_profit, fee_fallback_bps, ttl_ms): (Decimal, u32, u64),
        first: &PriceUpdate,
        second: &PriceUpdate,
        third: &PriceUpdate,
    ) -> Result<(), DetectorError> {
        let q_start = self.config.detector.max_trade_base;
        let keep = |fee_bps: u32| {
            Decimal::from(BPS_DENOMINATOR - fee_bps.min(BPS_DENOMINATOR))
                / Decimal::from(BPS_DENOMINATOR)
        };
        let f1 = effective_fee_bps(first, fee_fallback_bps);
        let f2 = effective_fee_bps(second, fee_fallback_bps);
        let f3 = effective_fee_bps(third, fee_fallback_bps);

        let x_amount = q_start
            .checked_div(first.price)
            .and_then(|v| v.checked_mul(keep(f1)))
            .ok_or_else(|| overflow("cycle first hop"))?;
        let y_amount = x_amount
            .checked_div(second.price)
            .and_then(|v| v.checked_mul(keep(f2)))
            .ok_or_else(|| overflow("cycle second hop"))?;
        let q_out = y_amount
            .checked_mul(third.price)
            .and_then(|v| v.checked_mul(keep(f3)))
            .ok_or_else(|| overflow("cycle third hop"))?;
        let net = q_out - q_start;
        if net < min_profit {
            return Ok(());
        }

        // Fee-free cycle output gives the gross figure; fees are the delta.
        let gross = q_start
            .checked_div(first.price)
            .and_then(|v| v.checked_div(second.price))
            .and_then(|v| v.checked_mul(third.price))
            .and_then(|v| v.checked_sub(q_start))
            .ok_or_else(|| overflow("cycle gross"))?;
        let fees = (gross - net).max(Decimal::ZERO);
        let staleness_window = Duration::from_millis(
            self.config
                .chain(chain)
                .map_err(|e| DetectorError::PairEvaluation(e.to_string()))?
                .staleness_window_ms,
        );
        let max_leg_age = first.age().max(second.age()).max(third.age());
        let spread_bps = net
            .checked_div(q_start)
            .and_then(|r| r.checked_mul(Decimal::from(BPS_DENOMINATOR)))
            .and_then(|r| r.to_f64())
            .unwrap_or(0.0);
        let whale = self.whales.signal(chain, &first.pair.base);
        let confidence = self.scorer.score(
            &BaseSignal { spread_bps, max_leg_age, staleness_window },
            whale.as_ref(),
            None,
        );
        if confidence <= 0.0 {
            return Ok(());
        }

        let quote_decimals = first.quote_decimals;
        let legs = vec![
            OpportunityLeg {
                chain,
                dex: first.dex.clone(),
                token_in: first.pair.quote.clone(),
                token_out: first.pair.base.clone(),
                amount_in: to_units(q_start, quote_decimals)?,
            },
            OpportunityLeg {
                chain,
                dex: second.dex.clone(),
                token_in: second.pair.quote.clone(),
                token_out: second.pair.base.clone(),
                amount_in: to_units(x_amount, second.quote_decimals)?,
            },
            OpportunityLeg {
                chain,
                dex: third.dex.clone(),
                token_in: third.pair.base.clone(),
                token_out: third.pair.quote.clone(),
                amount_in: to_units(y_amount, third.base_decimals)?,
            },
        ];

        let now_ms = now_unix_ms();
        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::IntraChain,
            legs,
            gross_profit: to_units(gross, quote_decimals)?,
            fee_cost: to_units(fees, quote_decimals)?,
            bridge_cost: None,
            net_profit: to_units(net, quote_decimals)?,
            profit_asset: first.pair.quote.clone(),
            profit_decimals: quote_decimals,
            confidence,
            deadline_unix_ms: now_ms + ttl_ms,
            detected_at_unix_ms: now_ms,
            schema_version: OPPORTUNITY_SCHEMA_VERSION,
        };
        self.emit(opportunity).await
    }

    //============================================================================================//
    //                                        Helpers                                             //
    //============================================================================================//

    /// Trade size in human base units: the configured cap bounded by the
    /// shallower leg's liquidity.
    fn trade_size(&self, buy: &PriceUpdate, sell: &PriceUpdate) -> Result<Decimal, DetectorError> {
        let cap = self.config.detector.max_trade_base;
        let buy_depth = units_to_decimal(buy.liquidity, buy.base_decimals)
            .ok_or_else(|| DetectorError::UnitConversion("buy leg liquidity".into()))?;
        let sell_depth = units_to_decimal(sell.liquidity, sell.base_decimals)
            .ok_or_else(|| DetectorError::UnitConversion("sell leg liquidity".into()))?;
        Ok(cap.min(buy_depth).min(sell_depth))
    }

    async fn emit(&self, opportunity: Opportunity) -> Result<(), DetectorError> {
        let chain = opportunity.source_chain().map(|c| c.to_string()).unwrap_or_default();
        OPPORTUNITIES_DETECTED
            .with_label_values(&[&chain, &opportunity.kind.to_string()])
            .inc();
        info!(
            id = %opportunity.id,
            kind = %opportunity.kind,
            chain,
            net_profit = %opportunity.net_profit,
            confidence = opportunity.confidence,
            "Opportunity detected"
        );
        self.publisher.publish(opportunity).await
    }
}

fn settings_min(settings: &crate::config::ChainSettings) -> (Decimal, u32, u64) {
    (settings.min_profit, settings.fee_fallback_bps, settings.opportunity_ttl_ms)
}

fn overflow(context: &str) -> DetectorError {
    DetectorError::PairEvaluation(format!("{context}: arithmetic overflow"))
}

/// Combined taker fees on both legs in quote units, `None` on overflow.
fn leg_fees(
    buy_notional: Decimal,
    buy_bps: u32,
    sell_notional: Decimal,
    sell_bps: u32,
) -> Option<Decimal> {
    let buy_fee = buy_notional.checked_mul(Decimal::from(buy_bps))?;
    let sell_fee = sell_notional.checked_mul(Decimal::from(sell_bps))?;
    Some(buy_fee.checked_add(sell_fee)? / Decimal::from(BPS_DENOMINATOR))
}

fn spread_bps(buy: Decimal, sell: Decimal) -> f64 {
    (sell - buy)
        .checked_div(buy)
        .and_then(|r| r.checked_mul(Decimal::from(BPS_DENOMINATOR)))
        .and_then(|r| r.to_f64())
        .unwrap_or(0.0)
}

fn effective_fee_bps(update: &PriceUpdate, fallback_bps: u32) -> u32 {
    if update.fee_bps == 0 {
        fallback_bps
    } else {
        update.fee_bps
    }
}

fn to_units(amount: Decimal, decimals: u8) -> Result<U256, DetectorError> {
    decimal_to_units(amount, decimals)
        .ok_or_else(|| DetectorError::UnitConversion(format!("{amount} @ {decimals} decimals")))
}

fn validate_price_update(update: &PriceUpdate) -> Result<(), ValidationError> {
    if update.price <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePrice(update.price, update.pair.clone()));
    }
    // Magnitude window: anything outside it cannot be combined with a sane
    // trade size without leaving `Decimal`'s 96-bit mantissa mid-calculation.
    let max_price = Decimal::from(10u64.pow(15));
    let min_price = Decimal::new(1, 12);
    if update.price > max_price || update.price < min_price {
        return Err(ValidationError::PriceOutOfRange(update.price, update.pair.clone()));
    }
    if update.fee_bps > BPS_DENOMINATOR {
        return Err(ValidationError::AmountOutOfRange(format!(
            "fee {} bps exceeds {} for pair {}",
            update.fee_bps, BPS_DENOMINATOR, update.pair
        )));
    }
    if update.liquidity.is_zero() {
        return Err(ValidationError::ZeroLiquidity(update.pair.clone()));
    }
    Ok(())
}
