//! Relayer binary: runs one [`tailer::ChainTailer`] per configured chain
//! concurrently, each publishing to the shared bus, with graceful
//! shutdown on Ctrl+C.

mod tailer;

use std::sync::Arc;

use anyhow::{Context, Result};
use escrow_core::{BusConfig, ChainConfig, DbConfig, PgEventBus, Publisher};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct RelayerConfig {
    db: DbConfig,
    bus: BusConfig,
    chains: Vec<ChainConfig>,
    #[serde(default = "default_metrics_addr")]
    metrics_addr: std::net::SocketAddr,
}

fn default_metrics_addr() -> std::net::SocketAddr {
    "0.0.0.0:9100".parse().unwrap()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    info!("starting escrow relayer");

    let config: RelayerConfig = escrow_core::load_toml("RELAYER_CONFIG_PATH", "relayer.toml")
        .context("loading relayer configuration")?;

    if let Err(e) = escrow_core::metrics::install_recorder(config.metrics_addr) {
        error!(error = %e, "failed to install metrics recorder, continuing without metrics");
    }

    let pool = config
        .db
        .connect()
        .await
        .context("connecting to projection database")?;
    sqlx::migrate!("../core/migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let checkpoints = Arc::new(escrow_core::CheckpointStore::new(pool.clone()));
    let publisher: Arc<dyn Publisher> = Arc::new(PgEventBus::new(pool.clone(), config.bus.ack_deadline_secs));

    let cancel = CancellationToken::new();
    let mut tailers = Vec::new();
    for chain in config.chains {
        let chain_id = chain.chain_id;
        let tailer = tailer::ChainTailer::new(chain, checkpoints.clone(), publisher.clone(), config.bus.topic.clone())
            .with_context(|| format!("building tailer for chain {chain_id}"))?;
        tailers.push((chain_id, tailer));
    }

    let mut join_set = tokio::task::JoinSet::new();
    for (chain_id, tailer) in tailers {
        let cancel = cancel.clone();
        join_set.spawn(async move { (chain_id, tailer.run(cancel).await) });
    }

    // If any tailer exits with a fatal error, bring the whole process
    // down with its exit code rather than limping along on the remaining
    // chains.
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, draining tailers");
            cancel.cancel();
            while join_set.join_next().await.is_some() {}
        }
        _ = async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((chain_id, Ok(()))) => info!(chain_id, "tailer exited cleanly"),
                    Ok((chain_id, Err(fatal))) => {
                        error!(chain_id, error = %fatal, exit_code = fatal.exit_code(), "tailer hit a fatal anomaly");
                        std::process::exit(fatal.exit_code());
                    }
                    Err(join_err) => {
                        error!(error = %join_err, "tailer task panicked");
                        std::process::exit(1);
                    }
                }
            }
        } => {}
    }

    info!("relayer stopped");
    Ok(())
}
