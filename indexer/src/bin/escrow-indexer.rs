//! Indexer binary: runs the Subscriber workers and the Query API
//! concurrently, draining both on Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use escrow_core::{BusConfig, DbConfig, OperationalConfig, PgEventBus, ProjectionEngine};
use escrow_indexer::{api, health, subscriber};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Deserialize)]
struct IndexerConfig {
    db: DbConfig,
    bus: BusConfig,
    #[serde(default = "default_api_addr")]
    api_addr: SocketAddr,
    #[serde(default = "default_subscriber_workers")]
    subscriber_workers: usize,
    #[serde(default)]
    operational: OperationalConfig,
    #[serde(default = "default_metrics_addr")]
    metrics_addr: SocketAddr,
}

fn default_api_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_subscriber_workers() -> usize {
    4
}

fn default_metrics_addr() -> SocketAddr {
    "0.0.0.0:9101".parse().unwrap()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    info!("starting escrow indexer");

    let config: IndexerConfig = escrow_core::load_toml("INDEXER_CONFIG_PATH", "indexer.toml")
        .context("loading indexer configuration")?;

    if let Err(e) = escrow_core::metrics::install_recorder(config.metrics_addr) {
        tracing::error!(error = %e, "failed to install metrics recorder, continuing without metrics");
    }

    let pool = config
        .db
        .connect()
        .await
        .context("connecting to projection database")?;
    sqlx::migrate!("../core/migrations").run(&pool).await.context("running migrations")?;

    let engine = Arc::new(ProjectionEngine::new(pool.clone()));
    let bus: Arc<dyn escrow_core::Subscriber> =
        Arc::new(PgEventBus::new(pool.clone(), config.bus.ack_deadline_secs));
    let health = health::HealthState::new(pool.clone(), config.operational.stale_threshold());
    health.mark_subscription_attached(true);

    let cancel = CancellationToken::new();

    let mut join_set = tokio::task::JoinSet::new();
    for id in 0..config.subscriber_workers {
        let worker = subscriber::SubscriberWorker::new(
            id,
            bus.clone(),
            engine.clone(),
            health.clone(),
            config.bus.topic.clone(),
            config.bus.subscription.clone().unwrap_or_else(|| config.bus.topic.clone()),
            config.bus.max_delivery_attempts as i32,
        );
        let cancel = cancel.clone();
        join_set.spawn(async move { worker.run(cancel).await });
    }

    let api_server = api::ApiServer::new(config.api_addr, pool.clone(), health.clone());
    let api_cancel = cancel.clone();
    let api_handle = tokio::spawn(async move { api_server.run(api_cancel).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, draining subscriber workers and API server");
            cancel.cancel();
        }
    }

    while join_set.join_next().await.is_some() {}
    let _ = api_handle.await;

    info!("indexer stopped");
    Ok(())
}
