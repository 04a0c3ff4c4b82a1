// src/nonce.rs

//! # Nonce Allocation
//!
//! Hands out transaction nonces per `(chain, account)` with exactly-once
//! semantics under concurrency. The full read-modify-write of an acquisition
//! (sync check, backpressure check, candidate selection, lease insertion)
//! happens while holding the account's async mutex, so two concurrent callers
//! can never observe the same counter value.
//!
//! Released nonces are re-served lowest-first before the counter advances,
//! keeping the on-chain sequence gap-free. Pending leases that outlive their
//! TTL are reclaimed into the released pool rather than leaking capacity.

use crate::config::Config;
use crate::errors::NonceError;
use crate::metrics::NONCE_EXHAUSTION;
use crate::types::{ChainId, LeaseState, NonceLease};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-chain view of an account's next nonce, queried once per account on
/// first use and again on explicit resync.
#[async_trait]
pub trait ChainNonceSource: Send + Sync + std::fmt::Debug {
    async fn next_nonce(&self, chain: ChainId, address: Address) -> Result<u64, NonceError>;
}

/// Nonce source backed by per-chain JSON-RPC providers.
#[derive(Debug)]
pub struct RpcNonceSource {
    config: Arc<Config>,
    providers: DashMap<u64, Arc<ethers::providers::Provider<ethers::providers::Http>>>,
}

impl RpcNonceSource {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self { config, providers: DashMap::new() })
    }

    fn provider(
        &self,
        chain: ChainId,
        address: Address,
    ) -> Result<Arc<ethers::providers::Provider<ethers::providers::Http>>, NonceError> {
        if let Some(p) = self.providers.get(&chain.0) {
            return Ok(p.clone());
        }
        let url = self
            .config
            .chain(chain)
            .map_err(|e| NonceError::SyncFailed { chain, address, reason: e.to_string() })?
            .rpc_url
            .clone();
        let provider = ethers::providers::Provider::try_from(url.as_str()).map_err(|e| {
            NonceError::SyncFailed { chain, address, reason: format!("{url}: {e}") }
        })?;
        let provider = Arc::new(provider);
        self.providers.insert(chain.0, provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl ChainNonceSource for RpcNonceSource {
    async fn next_nonce(&self, chain: ChainId, address: Address) -> Result<u64, NonceError> {
        use ethers::providers::Middleware;
        let provider = self.provider(chain, address)?;
        let count = provider
            .get_transaction_count(address, None)
            .await
            .map_err(|e| NonceError::SyncFailed { chain, address, reason: e.to_string() })?;
        Ok(count.as_u64())
    }
}

/// Fixed nonce source for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticNonceSource {
    start: u64,
}

impl StaticNonceSource {
    pub fn starting_at(start: u64) -> Arc<Self> {
        Arc::new(Self { start })
    }
}

#[async_trait]
impl ChainNonceSource for StaticNonceSource {
    async fn next_nonce(&self, _chain: ChainId, _address: Address) -> Result<u64, NonceError> {
        Ok(self.start)
    }
}

#[derive(Debug)]
struct AccountNonces {
    /// Next never-issued nonce. Only valid once `synced` is set.
    next: u64,
    synced: bool,
    /// Released nonces below `next`, re-served lowest-first.
    released: BTreeSet<u64>,
    /// In-flight leases keyed by nonce.
    pending: HashMap<u64, NonceLease>,
}

impl AccountNonces {
    fn new() -> Self {
        Self { next: 0, synced: false, released: BTreeSet::new(), pending: HashMap::new() }
    }
}

/// Per-account nonce allocator shared across submitter tasks.
#[derive(Debug)]
pub struct NonceManager {
    config: Arc<Config>,
    source: Arc<dyn ChainNonceSource>,
    accounts: DashMap<(u64, Address), Arc<Mutex<AccountNonces>>>,
}

impl NonceManager {
    pub fn new(config: Arc<Config>, source: Arc<dyn ChainNonceSource>) -> Self {
        Self { config, source, accounts: DashMap::new() }
    }

    fn account(&self, chain: ChainId, address: Address) -> Arc<Mutex<AccountNonces>> {
        self.accounts
            .entry((chain.0, address))
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonces::new())))
            .clone()
    }

    /// On-chain nonce query with an explicit timeout. The account mutex is
    /// held while this runs, so a hung RPC must not be allowed to wedge every
    /// acquisition for the account.
    async fn fetch_chain_nonce(
        &self,
        chain: ChainId,
        address: Address,
    ) -> Result<u64, NonceError> {
        let timeout = Duration::from_millis(self.config.resilience.nonce_sync_timeout_ms);
        match tokio::time::timeout(timeout, self.source.next_nonce(chain, address)).await {
            Ok(result) => result,
            Err(_) => Err(NonceError::SyncFailed {
                chain,
                address,
                reason: format!("chain nonce query timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    /// Acquires a nonce lease for the account. Refuses with
    /// `NonceError::Exhausted` when the per-account pending cap is reached;
    /// the caller is expected to back off, not to bypass.
    pub async fn acquire(&self, chain: ChainId, address: Address) -> Result<NonceLease, NonceError> {
        let max_pending = self
            .config
            .chain(chain)
            .map(|c| c.max_pending_nonces)
            .map_err(|e| NonceError::SyncFailed { chain, address, reason: e.to_string() })?;

        let account = self.account(chain, address);
        let mut state = account.lock().await;

        if !state.synced {
            let next = self.fetch_chain_nonce(chain, address).await?;
            state.next = next;
            state.synced = true;
            info!(%chain, %address, next, "Synced account nonce from chain");
        }

        if state.pending.len() >= max_pending {
            NONCE_EXHAUSTION.with_label_values(&[&chain.to_string()]).inc();
            warn!(
                %chain,
                %address,
                pending = state.pending.len(),
                max_pending,
                "Nonce acquisition refused; pending cap reached"
            );
            return Err(NonceError::Exhausted {
                chain,
                address,
                pending: state.pending.len(),
                max_pending,
            });
        }

        // Reuse the lowest released nonce first so the sequence stays gap-free.
        let nonce = match state.released.iter().next().copied() {
            Some(n) => {
                state.released.remove(&n);
                n
            }
            None => {
                let n = state.next;
                state.next += 1;
                n
            }
        };

        let lease = NonceLease {
            chain,
            address,
            nonce,
            state: LeaseState::Pending,
            issued_at: Instant::now(),
        };
        state.pending.insert(nonce, lease.clone());
        debug!(%chain, %address, nonce, pending = state.pending.len(), "Issued nonce lease");
        Ok(lease)
    }

    /// Marks a pending lease as consumed on chain. The nonce is never reused.
    pub async fn confirm(
        &self,
        chain: ChainId,
        address: Address,
        nonce: u64,
    ) -> Result<(), NonceError> {
        let account = self.account(chain, address);
        let mut state = account.lock().await;
        match state.pending.remove(&nonce) {
            Some(_) => {
                debug!(%chain, %address, nonce, "Nonce lease confirmed");
                Ok(())
            }
            None => Err(NonceError::LeaseStateViolation {
                chain,
                address,
                nonce,
                detail: "confirm on a lease that is not pending".to_string(),
            }),
        }
    }

    /// Returns a pending lease's nonce to the pool after a failed submission.
    pub async fn release(
        &self,
        chain: ChainId,
        address: Address,
        nonce: u64,
    ) -> Result<(), NonceError> {
        let account = self.account(chain, address);
        let mut state = account.lock().await;
        match state.pending.remove(&nonce) {
            Some(_) => {
                state.released.insert(nonce);
                debug!(%chain, %address, nonce, "Nonce lease released for reuse");
                Ok(())
            }
            None => Err(NonceError::LeaseStateViolation {
                chain,
                address,
                nonce,
                detail: "release on a lease that is not pending".to_string(),
            }),
        }
    }

    /// Sweeps pending leases older than `ttl` back into the released pool.
    /// Returns the reclaimed leases, marked `Expired`.
    pub async fn reclaim_expired(
        &self,
        chain: ChainId,
        address: Address,
        ttl: Duration,
    ) -> Vec<NonceLease> {
        let account = self.account(chain, address);
        let mut state = account.lock().await;
        let expired: Vec<u64> = state
            .pending
            .values()
            .filter(|l| l.issued_at.elapsed() >= ttl)
            .map(|l| l.nonce)
            .collect();
        let mut reclaimed = Vec::with_capacity(expired.len());
        for nonce in expired {
            if let Some(mut lease) = state.pending.remove(&nonce) {
                lease.state = LeaseState::Expired;
                state.released.insert(nonce);
                warn!(%chain, %address, nonce, "Reclaimed expired nonce lease");
                reclaimed.push(lease);
            }
        }
        reclaimed
    }

    /// Re-reads the on-chain nonce and discards local state that the chain
    /// has overtaken. Used after an out-of-band transaction is detected.
    pub async fn resync(&self, chain: ChainId, address: Address) -> Result<u64, NonceError> {
        let account = self.account(chain, address);
        let mut state = account.lock().await;
        let chain_next = self.fetch_chain_nonce(chain, address).await?;
        if chain_next > state.next {
            state.next = chain_next;
        }
        state.released.retain(|n| *n >= chain_next);
        state.pending.retain(|n, _| *n >= chain_next);
        state.synced = true;
        info!(%chain, %address, chain_next, local_next = state.next, "Resynced account nonce");
        Ok(state.next)
    }

    /// Pending lease count, for backpressure-aware callers.
    pub async fn pending_count(&self, chain: ChainId, address: Address) -> usize {
        let account = self.account(chain, address);
        let state = account.lock().await;
        state.pending.len()
    }
}
