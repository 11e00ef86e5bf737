//! Backfill Runner binary: a one-shot CLI that replays a historical
//! block range through the Projection Engine directly.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use escrow_backfill::BackfillRunner;
use escrow_core::rpc::EvmClient;
use escrow_core::{DbConfig, ProjectionEngine};
use serde::Deserialize;
use tracing::info;

/// Signature table for one chain, shaped like `escrow_core::ChainConfig`
/// but trimmed to what Backfill needs to resolve `topic0 -> event type`.
/// Loaded from the same relayer configuration file so chain-id -> event
/// signature mappings never have to be duplicated by hand on the CLI.
#[derive(Debug, Deserialize)]
struct SignaturesFile {
    chains: Vec<ChainSignatures>,
}

#[derive(Debug, Deserialize)]
struct ChainSignatures {
    chain_id: u64,
    #[serde(default)]
    event_signatures: HashMap<String, String>,
}

#[derive(Debug, Parser)]
#[command(name = "escrow-backfill", about = "Replay historical blocks through the escrow projection engine")]
struct Cli {
    #[arg(long)]
    chain_id: u64,

    #[arg(long)]
    from: Option<u64>,

    /// A block number, or `latest` to walk the most recent `--from`
    /// blocks back from the chain head.
    #[arg(long, default_value = "latest")]
    to: String,

    /// When `--to latest` is used and `--from` is omitted, how many
    /// blocks back from the head to walk.
    #[arg(long, default_value_t = 10_000)]
    window: u64,

    #[arg(long, value_delimiter = ',')]
    contracts: Vec<String>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    db_url: Option<String>,

    #[arg(long)]
    rpc_url: String,

    #[arg(long, default_value_t = 1_000)]
    batch_size: u64,

    /// Path to the relayer-style TOML carrying `[[chains]]` entries with
    /// `event_signatures`; only the entry for `--chain-id` is used.
    #[arg(long, default_value = "relayer.toml")]
    signatures_config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    info!(chain_id = cli.chain_id, dry_run = cli.dry_run, "starting backfill run");

    let event_signatures = load_event_signatures(&cli.signatures_config, cli.chain_id)
        .context("loading event signatures")?;

    let client = EvmClient::new(&cli.rpc_url).context("building EVM RPC client")?;

    let to_block = match cli.to.as_str() {
        "latest" => {
            let head = client.get_block_number().await.context("fetching chain head for --to latest")?;
            head
        }
        other => other.parse::<u64>().context("--to must be a block number or 'latest'")?,
    };

    let from_block = match cli.from {
        Some(f) => f,
        None => to_block.saturating_sub(cli.window),
    };

    if from_block > to_block {
        anyhow::bail!("--from ({from_block}) is after --to ({to_block})");
    }

    let engine = if cli.dry_run {
        None
    } else {
        let db_url = cli.db_url.context("--db-url is required unless --dry-run is set")?;
        let db = DbConfig {
            url: db_url,
            max_connections: 4,
        };
        let pool = db.connect().await.context("connecting to projection database")?;
        sqlx::migrate!("../core/migrations").run(&pool).await.context("running migrations")?;
        Some(Arc::new(ProjectionEngine::new(pool)))
    };

    let runner = BackfillRunner::new(
        client,
        engine,
        cli.chain_id,
        cli.contracts,
        event_signatures,
        cli.batch_size,
        cli.dry_run,
    );

    let report = runner
        .run(from_block, to_block)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("backfill run failed")?;

    info!(
        chain_id = cli.chain_id,
        from = from_block,
        to = to_block,
        blocks_scanned = report.blocks_scanned,
        logs_seen = report.logs_seen,
        events_decoded = report.events_decoded,
        events_skipped_unconfigured = report.events_skipped_unconfigured,
        events_malformed = report.events_malformed,
        outcomes_applied = report.outcomes_applied,
        outcomes_duplicate = report.outcomes_duplicate,
        outcomes_buffered = report.outcomes_buffered,
        outcomes_rejected = report.outcomes_rejected,
        "backfill run complete"
    );

    Ok(())
}

fn load_event_signatures(path: &str, chain_id: u64) -> Result<HashMap<String, String>> {
    if !std::path::Path::new(path).exists() {
        anyhow::bail!(
            "signatures config '{path}' not found; pass --signatures-config pointing at a relayer-style TOML"
        );
    }
    let content = std::fs::read_to_string(path)?;
    let file: SignaturesFile = toml::from_str(&content)?;
    file.chains
        .into_iter()
        .find(|c| c.chain_id == chain_id)
        .map(|c| c.event_signatures)
        .ok_or_else(|| anyhow::anyhow!("no chain entry for chain_id {chain_id} in '{path}'"))
}
