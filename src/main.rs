// src/main.rs

//! Runner binary: loads configuration, wires the detection and execution
//! pipeline together and runs until interrupted.

use clap::Parser;
use eyre::{Context, Result};
use omniarb::bridge::{BridgeCostEstimator, HttpPriceSource};
use omniarb::circuit::CircuitBreakerRegistry;
use omniarb::config::Config;
use omniarb::detector::{DetectorEngine, WhaleTracker};
use omniarb::dlq::{DeadLetterQueue, DlqStore, InMemoryDlqStore, PostgresDlqStore};
use omniarb::nonce::{NonceManager, RpcNonceSource};
use omniarb::predict::LatencyModel;
use omniarb::stream::{BroadcastPublisher, ChannelEventStream};
use omniarb::submitter::{ExecutionSubmitter, HttpExecutionClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "omniarb", about = "Multi-chain arbitrage core")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Bind address for the Prometheus /metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9184")]
    metrics_addr: SocketAddr,

    /// Base URL of the native-asset price API.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    price_endpoint: String,

    /// Base URL of the execution relay.
    #[arg(long, default_value = "http://127.0.0.1:8081")]
    execution_endpoint: String,

    /// Postgres URL for the durable dead-letter store. Falls back to the
    /// in-memory store when absent.
    #[arg(long, env = "OMNIARB_DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(
        Config::load_from_file(&cli.config)
            .await
            .wrap_err_with(|| format!("loading configuration from {}", cli.config))?,
    );
    info!(chains = config.chains.len(), "Configuration loaded");

    let metrics_handle = omniarb::metrics::serve_metrics(cli.metrics_addr);

    let model = LatencyModel::new(&config.bridge);
    let price_source =
        Arc::new(HttpPriceSource::new(&cli.price_endpoint, Duration::from_secs(5))?);
    let bridge =
        Arc::new(BridgeCostEstimator::new(config.clone(), price_source, model.clone()));
    let whales = Arc::new(WhaleTracker::new(Duration::from_millis(
        config.detector.whale_flow_ttl_ms,
    )));

    let publisher = BroadcastPublisher::new(config.detector.event_channel_capacity);
    let engine = Arc::new(DetectorEngine::new(
        config.clone(),
        whales,
        bridge,
        model,
        Arc::new(publisher.clone()),
    ));

    let nonces = Arc::new(NonceManager::new(config.clone(), RpcNonceSource::new(config.clone())));
    let breakers =
        Arc::new(CircuitBreakerRegistry::new(Arc::new(config.resilience.clone())));
    let dlq_store: Arc<dyn DlqStore> = match &cli.database_url {
        Some(url) => {
            let pg_config: tokio_postgres::Config =
                url.parse().wrap_err("parsing Postgres URL")?;
            let manager = deadpool_postgres::Manager::from_config(
                pg_config,
                tokio_postgres::NoTls,
                deadpool_postgres::ManagerConfig {
                    recycling_method: deadpool_postgres::RecyclingMethod::Fast,
                },
            );
            let pool = deadpool_postgres::Pool::builder(manager)
                .max_size(8)
                .build()
                .wrap_err("building Postgres pool")?;
            let store = PostgresDlqStore::new(pool);
            store.ensure_schema().await.wrap_err("ensuring DLQ schema")?;
            Arc::new(store)
        }
        None => {
            warn!("No database URL configured; dead-letter entries will not survive restarts");
            InMemoryDlqStore::new()
        }
    };
    let dlq = DeadLetterQueue::new(dlq_store);

    let client = Arc::new(HttpExecutionClient::new(
        &cli.execution_endpoint,
        Duration::from_millis(config.resilience.submit_timeout_ms),
    )?);
    let submitter = Arc::new(ExecutionSubmitter::new(
        config.clone(),
        nonces,
        breakers,
        dlq,
        client,
    ));

    // Ingestion adapters (out of process or in a sibling crate) feed
    // normalized events through this sender.
    let (events_tx, event_stream) =
        ChannelEventStream::new(config.detector.event_channel_capacity);

    let shutdown = CancellationToken::new();
    let detector_task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(Box::new(event_stream), shutdown).await })
    };
    let submitter_task = {
        let submitter = submitter.clone();
        let receiver = publisher.subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { submitter.run(receiver, shutdown).await })
    };

    info!("omniarb running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.wrap_err("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown.cancel();
    drop(events_tx);

    let _ = futures::future::join(detector_task, submitter_task).await;
    metrics_handle.abort();
    info!("Shutdown complete");
    Ok(())
}
