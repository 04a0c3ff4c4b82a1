// src/stream.rs

//! # Ingestion and Publication Boundaries
//!
//! The core neither speaks venue protocols nor owns a broker: normalized
//! market events arrive through a [`MarketEventStream`] and vetted
//! opportunities leave through an [`OpportunityPublisher`]. Both seams are
//! trait objects so tests and deployments can swap transports without
//! touching the detector.
//!
//! Delivery on the inbound side is at-least-once; dedup happens in the price
//! book, not here.

use crate::errors::DetectorError;
use crate::metrics::OPPORTUNITIES_PUBLISHED;
use crate::types::{MarketEvent, Opportunity};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Inbound stream of normalized market events.
#[async_trait]
pub trait MarketEventStream: Send {
    /// Next event, or `None` when the upstream feed has closed.
    async fn next_event(&mut self) -> Option<MarketEvent>;
}

/// Event stream backed by an in-process channel. The ingestion layer (or a
/// test) holds the sender.
#[derive(Debug)]
pub struct ChannelEventStream {
    rx: mpsc::Receiver<MarketEvent>,
}

impl ChannelEventStream {
    pub fn new(capacity: usize) -> (mpsc::Sender<MarketEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl MarketEventStream for ChannelEventStream {
    async fn next_event(&mut self) -> Option<MarketEvent> {
        self.rx.recv().await
    }
}

/// Outbound sink for vetted opportunities.
#[async_trait]
pub trait OpportunityPublisher: Send + Sync + std::fmt::Debug {
    async fn publish(&self, opportunity: Opportunity) -> Result<(), DetectorError>;
}

/// Fan-out publisher backed by a broadcast channel; every subscriber (the
/// submitter, loggers, tooling) receives each opportunity.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Opportunity>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Opportunity> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl OpportunityPublisher for BroadcastPublisher {
    async fn publish(&self, opportunity: Opportunity) -> Result<(), DetectorError> {
        let id = opportunity.id;
        match self.tx.send(opportunity) {
            Ok(receivers) => {
                OPPORTUNITIES_PUBLISHED.inc();
                debug!(%id, receivers, "Opportunity published");
                Ok(())
            }
            Err(_) => {
                // No live subscriber. The opportunity is perishable anyway.
                warn!(%id, "Opportunity dropped; no subscribers");
                Err(DetectorError::Publish("no subscribers".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, OpportunityKind, OPPORTUNITY_SCHEMA_VERSION};
    use ethers::types::U256;
    use uuid::Uuid;

    fn opportunity() -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::CrossDex,
            legs: vec![],
            gross_profit: U256::from(100u64),
            fee_cost: U256::from(10u64),
            bridge_cost: None,
            net_profit: U256::from(90u64),
            profit_asset: Asset::new("USDC"),
            profit_decimals: 6,
            confidence: 0.8,
            deadline_unix_ms: u64::MAX,
            detected_at_unix_ms: 0,
            schema_version: OPPORTUNITY_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        let opp = opportunity();
        publisher.publish(opp.clone()).await.unwrap();
        assert_eq!(a.recv().await.unwrap().id, opp.id);
        assert_eq!(b.recv().await.unwrap().id, opp.id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_an_error() {
        let publisher = BroadcastPublisher::new(8);
        let err = publisher.publish(opportunity()).await.unwrap_err();
        assert!(matches!(err, DetectorError::Publish(_)));
    }

    #[tokio::test]
    async fn channel_stream_yields_events_then_closes() {
        let (tx, mut stream) = ChannelEventStream::new(4);
        let swap = crate::types::SwapEvent {
            chain: crate::types::ChainId(1),
            dex: crate::types::DexId::new("uni"),
            token_in: Asset::new("USDC"),
            token_out: Asset::new("WETH"),
            amount_in: U256::from(1u64),
            usd_value: 100.0,
            sequence: 1,
            tx_hash: ethers::types::H256::zero(),
            observed_at: std::time::Instant::now(),
        };
        tx.send(MarketEvent::Swap(swap)).await.unwrap();
        drop(tx);
        assert!(matches!(stream.next_event().await, Some(MarketEvent::Swap(_))));
        assert!(stream.next_event().await.is_none());
    }
}
