// src/detector/price_book.rs

//! # Per-Chain Price Book
//!
//! Latest-wins store of price observations keyed `(dex, pair)`. Ordering is
//! decided by the update's `sequence` field (block number or slot), never by
//! arrival time, so delivery reordering and at-least-once redelivery are both
//! absorbed here: an equal sequence is a duplicate no-op, a lower sequence is
//! stale and rejected.
//!
//! Entries are `Arc<PriceUpdate>` swapped wholesale; a reader holding a
//! snapshot never observes a half-written update.

use crate::types::{DexId, PairKey, PriceUpdate};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Disposition of one applied update, used for idempotence accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Newer than anything seen for the key; the book was updated.
    Applied,
    /// Same sequence as the stored entry; redelivery, no-op.
    Duplicate,
    /// Older than the stored entry; rejected.
    Stale,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::Stale => "stale",
        }
    }
}

#[derive(Debug, Default)]
pub struct PriceBook {
    entries: RwLock<HashMap<(DexId, PairKey), Arc<PriceUpdate>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one update under latest-wins-by-sequence semantics.
    pub fn apply(&self, update: PriceUpdate) -> ApplyOutcome {
        let key = (update.dex.clone(), update.pair.clone());
        let mut entries = self.entries.write().expect("price book lock poisoned");
        match entries.get(&key) {
            Some(existing) if update.sequence < existing.sequence => ApplyOutcome::Stale,
            Some(existing) if update.sequence == existing.sequence => ApplyOutcome::Duplicate,
            _ => {
                entries.insert(key, Arc::new(update));
                ApplyOutcome::Applied
            }
        }
    }

    pub fn get(&self, dex: &DexId, pair: &PairKey) -> Option<Arc<PriceUpdate>> {
        self.entries
            .read()
            .expect("price book lock poisoned")
            .get(&(dex.clone(), pair.clone()))
            .cloned()
    }

    /// All venues currently quoting `pair`.
    pub fn venues(&self, pair: &PairKey) -> Vec<Arc<PriceUpdate>> {
        self.entries
            .read()
            .expect("price book lock poisoned")
            .iter()
            .filter(|((_, p), _)| p == pair)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Snapshot of every entry, for combinatorial scans.
    pub fn all(&self) -> Vec<Arc<PriceUpdate>> {
        self.entries.read().expect("price book lock poisoned").values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("price book lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainId;
    use ethers::types::U256;
    use rust_decimal::Decimal;
    use std::time::Instant;

    fn update(dex: &str, seq: u64, price: i64) -> PriceUpdate {
        PriceUpdate {
            chain: ChainId(1),
            dex: DexId::new(dex),
            pair: PairKey::new("WETH", "USDC"),
            price: Decimal::new(price, 0),
            liquidity: U256::from(10u64).pow(U256::from(20u64)),
            base_decimals: 18,
            quote_decimals: 6,
            fee_bps: 30,
            sequence: seq,
            observed_at: Instant::now(),
        }
    }

    #[test]
    fn newer_sequence_replaces_older() {
        let book = PriceBook::new();
        assert_eq!(book.apply(update("uni", 10, 2000)), ApplyOutcome::Applied);
        assert_eq!(book.apply(update("uni", 11, 2010)), ApplyOutcome::Applied);
        let stored = book.get(&DexId::new("uni"), &PairKey::new("WETH", "USDC")).unwrap();
        assert_eq!(stored.sequence, 11);
        assert_eq!(stored.price, Decimal::new(2010, 0));
    }

    #[test]
    fn redelivery_is_a_duplicate_no_op() {
        let book = PriceBook::new();
        book.apply(update("uni", 10, 2000));
        assert_eq!(book.apply(update("uni", 10, 9999)), ApplyOutcome::Duplicate);
        // The stored price is untouched by the duplicate.
        let stored = book.get(&DexId::new("uni"), &PairKey::new("WETH", "USDC")).unwrap();
        assert_eq!(stored.price, Decimal::new(2000, 0));
    }

    #[test]
    fn out_of_order_arrival_is_rejected() {
        let book = PriceBook::new();
        book.apply(update("uni", 12, 2020));
        assert_eq!(book.apply(update("uni", 11, 2010)), ApplyOutcome::Stale);
        let stored = book.get(&DexId::new("uni"), &PairKey::new("WETH", "USDC")).unwrap();
        assert_eq!(stored.sequence, 12);
    }

    #[test]
    fn venues_are_keyed_independently() {
        let book = PriceBook::new();
        book.apply(update("uni", 10, 2000));
        book.apply(update("sushi", 3, 2020));
        assert_eq!(book.venues(&PairKey::new("WETH", "USDC")).len(), 2);
        assert_eq!(book.venues(&PairKey::new("WBTC", "USDC")).len(), 0);
    }
}
