// src/submitter.rs

//! # Execution Submitter
//!
//! Drives a detected opportunity through nonce acquisition, circuit-breaker
//! admission and the external execution call. The pipeline enforces:
//!
//! - a last-moment expiry check immediately before the external call, so a
//!   queue-delayed opportunity is dropped, never submitted;
//! - a nonce lease is confirmed on success and released on every failure path
//!   before any retry, so a nonce is never resubmitted while still pending;
//! - retryable failures back off with capped exponential delay and bounded
//!   attempts; exhausting them captures the full opportunity into the DLQ.

use crate::circuit::CircuitBreakerRegistry;
use crate::config::Config;
use crate::dlq::DeadLetterQueue;
use crate::errors::SubmitError;
use crate::metrics::{OPPORTUNITIES_EXPIRED, SUBMISSIONS};
use crate::nonce::NonceManager;
use crate::types::{now_unix_ms, EndpointId, NonceLease, Opportunity};
use async_trait::async_trait;
use ethers::types::H256;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External execution boundary: signs and submits one opportunity using the
/// given nonce lease.
#[async_trait]
pub trait ExecutionClient: Send + Sync + std::fmt::Debug {
    async fn submit(
        &self,
        opportunity: &Opportunity,
        lease: &NonceLease,
    ) -> Result<H256, SubmitError>;
}

/// HTTP implementation posting opportunities to an execution relay.
#[derive(Debug)]
pub struct HttpExecutionClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(serde::Serialize)]
struct SubmitRequest<'a> {
    opportunity: &'a Opportunity,
    chain_id: u64,
    nonce: u64,
}

#[derive(serde::Deserialize)]
struct SubmitResponse {
    tx_hash: H256,
}

impl HttpExecutionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn submit(
        &self,
        opportunity: &Opportunity,
        lease: &NonceLease,
    ) -> Result<H256, SubmitError> {
        let url = format!("{}/submit", self.endpoint);
        let request = SubmitRequest {
            opportunity,
            chain_id: lease.chain.0,
            nonce: lease.nonce,
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(format!("{url}: {e}")))?;
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(SubmitError::Transport(format!("{url}: {status}")));
        }
        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SubmitError::Transport(format!("{url}: {e}")))?;
        Ok(parsed.tx_hash)
    }
}

pub struct ExecutionSubmitter {
    config: Arc<Config>,
    nonces: Arc<NonceManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    dlq: DeadLetterQueue,
    client: Arc<dyn ExecutionClient>,
}

impl ExecutionSubmitter {
    pub fn new(
        config: Arc<Config>,
        nonces: Arc<NonceManager>,
        breakers: Arc<CircuitBreakerRegistry>,
        dlq: DeadLetterQueue,
        client: Arc<dyn ExecutionClient>,
    ) -> Self {
        Self { config, nonces, breakers, dlq, client }
    }

    /// Consumes published opportunities until shutdown.
    pub async fn run(
        &self,
        mut opportunities: broadcast::Receiver<Opportunity>,
        shutdown: CancellationToken,
    ) {
        info!("Execution submitter started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Execution submitter shutting down");
                    return;
                }
                received = opportunities.recv() => {
                    match received {
                        Ok(opportunity) => {
                            let id = opportunity.id;
                            if let Err(e) = self.process(opportunity).await {
                                warn!(%id, error = %e, "Opportunity not executed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Submitter lagged; opportunities dropped by broadcast");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Opportunity channel closed; submitter stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Full submission pipeline for one opportunity.
    pub async fn process(&self, opportunity: Opportunity) -> Result<H256, SubmitError> {
        let chain = opportunity
            .source_chain()
            .ok_or_else(|| SubmitError::Rejected("opportunity has no legs".to_string()))?;
        let settings = self
            .config
            .chain(chain)
            .map_err(|e| SubmitError::Rejected(e.to_string()))?;
        let resilience = &self.config.resilience;
        let endpoint = EndpointId::execution(chain);
        let breaker = self.breakers.breaker(&endpoint);
        let chain_label = chain.to_string();

        if opportunity.is_expired(now_unix_ms()) {
            OPPORTUNITIES_EXPIRED.with_label_values(&["pre_submit"]).inc();
            SUBMISSIONS.with_label_values(&[&chain_label, "expired"]).inc();
            return Err(SubmitError::Expired(opportunity.id));
        }

        let mut last_error: Option<SubmitError> = None;
        for attempt in 1..=resilience.max_submit_attempts {
            let lease = self.nonces.acquire(chain, settings.executor_address).await?;

            // Last-moment check: the opportunity may have aged out while
            // queued or while backing off between attempts.
            if opportunity.is_expired(now_unix_ms()) {
                self.release_lease(&lease).await;
                OPPORTUNITIES_EXPIRED.with_label_values(&["last_moment"]).inc();
                SUBMISSIONS.with_label_values(&[&chain_label, "expired"]).inc();
                return Err(SubmitError::Expired(opportunity.id));
            }

            let permit = match breaker.try_acquire() {
                Ok(p) => p,
                Err(e) => {
                    self.release_lease(&lease).await;
                    let err = SubmitError::Circuit(e);
                    if attempt < resilience.max_submit_attempts {
                        debug!(id = %opportunity.id, attempt, error = %err, "Breaker refused; backing off");
                        last_error = Some(err);
                        self.backoff(attempt).await;
                        continue;
                    }
                    last_error = Some(err);
                    break;
                }
            };

            let timeout = Duration::from_millis(resilience.submit_timeout_ms);
            let outcome =
                match tokio::time::timeout(timeout, self.client.submit(&opportunity, &lease)).await
                {
                    Ok(Ok(hash)) => {
                        permit.succeed();
                        Ok(hash)
                    }
                    Ok(Err(e)) => {
                        // A definitive rejection means the endpoint answered;
                        // only transport-level failures count against it.
                        if matches!(e, SubmitError::Rejected(_)) {
                            permit.succeed();
                        } else {
                            permit.fail();
                        }
                        Err(e)
                    }
                    Err(_) => {
                        permit.fail();
                        Err(SubmitError::Timeout(resilience.submit_timeout_ms))
                    }
                };

            match outcome {
                Ok(hash) => {
                    self.nonces.confirm(chain, lease.address, lease.nonce).await?;
                    SUBMISSIONS.with_label_values(&[&chain_label, "success"]).inc();
                    info!(
                        id = %opportunity.id,
                        %chain,
                        nonce = lease.nonce,
                        tx = %hash,
                        attempt,
                        "Opportunity submitted"
                    );
                    return Ok(hash);
                }
                Err(e) => {
                    // The nonce goes back before any retry is considered.
                    self.release_lease(&lease).await;
                    warn!(id = %opportunity.id, %chain, attempt, error = %e, "Submission attempt failed");
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if retryable && attempt < resilience.max_submit_attempts {
                        SUBMISSIONS.with_label_values(&[&chain_label, "retry"]).inc();
                        self.backoff(attempt).await;
                        continue;
                    }
                    break;
                }
            }
        }

        let last_error =
            last_error.unwrap_or_else(|| SubmitError::Rejected("no attempts made".to_string()));
        self.dead_letter(&opportunity, &chain_label, last_error).await
    }

    async fn dead_letter(
        &self,
        opportunity: &Opportunity,
        chain_label: &str,
        last_error: SubmitError,
    ) -> Result<H256, SubmitError> {
        let message = last_error.to_string();
        self.dlq.capture("submission", opportunity.id, opportunity, &message).await?;
        SUBMISSIONS.with_label_values(&[chain_label, "dead_lettered"]).inc();
        error!(id = %opportunity.id, last_error = %message, "Submission dead-lettered");
        Err(SubmitError::RetriesExhausted {
            id: opportunity.id,
            attempts: self.config.resilience.max_submit_attempts,
            last_error: message,
        })
    }

    async fn release_lease(&self, lease: &NonceLease) {
        if let Err(e) = self.nonces.release(lease.chain, lease.address, lease.nonce).await {
            // Losing track of a lease is an invariant violation worth noise.
            error!(chain = %lease.chain, nonce = lease.nonce, error = %e, "Failed to release nonce lease");
        }
    }

    async fn backoff(&self, attempt: u32) {
        let resilience = &self.config.resilience;
        let base = resilience
            .retry_backoff_base_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(resilience.retry_backoff_cap_ms);
        let jitter = if resilience.jitter_factor > 0.0 {
            let range = base as f64 * resilience.jitter_factor;
            rand::thread_rng().gen_range(0.0..=range) as u64
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::dlq::InMemoryDlqStore;
    use crate::nonce::StaticNonceSource;
    use crate::types::{Asset, ChainId, DexId, OpportunityLeg, OpportunityKind, OPPORTUNITY_SCHEMA_VERSION};
    use ethers::types::U256;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Client returning a scripted sequence of submission outcomes.
    #[derive(Debug)]
    struct ScriptedClient {
        outcomes: Mutex<VecDeque<Result<H256, SubmitError>>>,
        calls: Mutex<Vec<u64>>,
    }

    impl ScriptedClient {
        fn new(outcomes: Vec<Result<H256, SubmitError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExecutionClient for ScriptedClient {
        async fn submit(
            &self,
            _opportunity: &Opportunity,
            lease: &NonceLease,
        ) -> Result<H256, SubmitError> {
            self.calls.lock().await.push(lease.nonce);
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(SubmitError::Transport("script exhausted".to_string())))
        }
    }

    fn harness(
        outcomes: Vec<Result<H256, SubmitError>>,
    ) -> (ExecutionSubmitter, Arc<ScriptedClient>, Arc<NonceManager>, DeadLetterQueue) {
        let mut config = test_config();
        config.resilience.retry_backoff_base_ms = 1;
        config.resilience.retry_backoff_cap_ms = 5;
        config.resilience.jitter_factor = 0.0;
        let config = Arc::new(config);
        let nonces =
            Arc::new(NonceManager::new(config.clone(), StaticNonceSource::starting_at(0)));
        let breakers = Arc::new(CircuitBreakerRegistry::new(Arc::new(
            config.resilience.clone(),
        )));
        let dlq = DeadLetterQueue::new(InMemoryDlqStore::new());
        let client = ScriptedClient::new(outcomes);
        let submitter = ExecutionSubmitter::new(
            config,
            nonces.clone(),
            breakers,
            dlq.clone(),
            client.clone(),
        );
        (submitter, client, nonces, dlq)
    }

    fn opportunity(deadline_unix_ms: u64) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::CrossDex,
            legs: vec![OpportunityLeg {
                chain: ChainId(1),
                dex: DexId::new("uni"),
                token_in: Asset::new("USDC"),
                token_out: Asset::new("WETH"),
                amount_in: U256::from(20_000_000_000u64),
            }],
            gross_profit: U256::from(200_000_000u64),
            fee_cost: U256::from(120_600_000u64),
            bridge_cost: None,
            net_profit: U256::from(79_400_000u64),
            profit_asset: Asset::new("USDC"),
            profit_decimals: 6,
            confidence: 0.8,
            deadline_unix_ms,
            detected_at_unix_ms: now_unix_ms(),
            schema_version: OPPORTUNITY_SCHEMA_VERSION,
        }
    }

    fn addr() -> ethers::types::Address {
        ethers::types::Address::repeat_byte(0x11)
    }

    #[tokio::test]
    async fn successful_submission_confirms_the_lease() {
        let (submitter, client, nonces, _dlq) =
            harness(vec![Ok(H256::repeat_byte(0xaa))]);
        let hash = submitter.process(opportunity(u64::MAX)).await.unwrap();
        assert_eq!(hash, H256::repeat_byte(0xaa));
        assert_eq!(client.calls.lock().await.as_slice(), &[0]);
        // Lease confirmed: nothing pending, the nonce is consumed for good.
        assert_eq!(nonces.pending_count(ChainId(1), addr()).await, 0);
        assert_eq!(nonces.acquire(ChainId(1), addr()).await.unwrap().nonce, 1);
    }

    #[tokio::test]
    async fn transient_failure_releases_and_reuses_the_nonce() {
        let (submitter, client, nonces, _dlq) = harness(vec![
            Err(SubmitError::Transport("connection reset".to_string())),
            Ok(H256::repeat_byte(0xbb)),
        ]);
        submitter.process(opportunity(u64::MAX)).await.unwrap();
        // Both attempts used the same nonce: released between, never leaked.
        assert_eq!(client.calls.lock().await.as_slice(), &[0, 0]);
        assert_eq!(nonces.pending_count(ChainId(1), addr()).await, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_capture_full_payload_in_dlq() {
        let (submitter, client, nonces, dlq) = harness(vec![
            Err(SubmitError::Transport("down".to_string())),
            Err(SubmitError::Transport("down".to_string())),
            Err(SubmitError::Transport("down".to_string())),
        ]);
        let opp = opportunity(u64::MAX);
        let err = submitter.process(opp.clone()).await.unwrap_err();
        assert!(matches!(err, SubmitError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(client.calls.lock().await.len(), 3);
        assert_eq!(nonces.pending_count(ChainId(1), addr()).await, 0);

        // The DLQ holds the complete opportunity, not a projection.
        let entries = dlq.list_pending(None, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        let restored: Opportunity = serde_json::from_value(entries[0].payload.clone()).unwrap();
        assert_eq!(restored.id, opp.id);
        assert_eq!(restored.net_profit, opp.net_profit);
        assert_eq!(restored.legs.len(), 1);
    }

    #[tokio::test]
    async fn definitive_rejection_is_not_retried() {
        let (submitter, client, _nonces, dlq) = harness(vec![Err(SubmitError::Rejected(
            "nonce too low".to_string(),
        ))]);
        let err = submitter.process(opportunity(u64::MAX)).await.unwrap_err();
        assert!(matches!(err, SubmitError::RetriesExhausted { .. }));
        assert_eq!(client.calls.lock().await.len(), 1);
        assert_eq!(dlq.list_pending(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_opportunity_is_dropped_without_a_call() {
        let (submitter, client, nonces, dlq) = harness(vec![Ok(H256::zero())]);
        let err = submitter.process(opportunity(1)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Expired(_)));
        assert!(client.calls.lock().await.is_empty());
        assert_eq!(nonces.pending_count(ChainId(1), addr()).await, 0);
        assert!(dlq.list_pending(None, 10).await.unwrap().is_empty());
    }
}
