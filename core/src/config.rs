//! Shared configuration types and the explicit config structs used in
//! place of module-level globals.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connection and pool settings for the shared projection database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl DbConfig {
    /// Recommended pool size: `max(4, 2 * subscriber_workers + api_workers)`.
    pub fn sized_for(subscriber_workers: u32, api_workers: u32) -> u32 {
        std::cmp::max(4, 2 * subscriber_workers + api_workers)
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await
    }
}

/// Per-chain tailing configuration: RPC endpoint, contract addresses,
/// event signature table, confirmation depth, window size, poll interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_addresses: Vec<String>,
    /// topic0 hash (lowercase hex, `0x`-prefixed) -> event type name.
    pub event_signatures: HashMap<String, String>,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_window_blocks")]
    pub max_window_blocks: u64,
    /// When true, this process tails the chain but never publishes — an
    /// operator-driven standby mode for hot spares.
    #[serde(default)]
    pub standby: bool,
}

fn default_confirmation_depth() -> u64 {
    12
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_max_window_blocks() -> u64 {
    2_000
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resolve_event_type(&self, topic0: &str) -> Option<&str> {
        self.event_signatures
            .get(&topic0.to_lowercase())
            .map(String::as_str)
    }
}

/// Bus resource names: topic and subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub topic: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default = "default_ack_deadline_secs")]
    pub ack_deadline_secs: u64,
}

fn default_max_in_flight() -> usize {
    1_000
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_ack_deadline_secs() -> u64 {
    60
}

/// Operational surface settings: staleness threshold for `/health`, and
/// the subscriber backlog alert threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalConfig {
    #[serde(default = "default_stale_threshold_s")]
    pub stale_threshold_s: u64,
    #[serde(default = "default_subscriber_backlog_alert")]
    pub subscriber_backlog_alert: u64,
    #[serde(default = "default_call_timeout_s")]
    pub call_timeout_s: u64,
    #[serde(default = "default_drain_timeout_s")]
    pub drain_timeout_s: u64,
}

fn default_stale_threshold_s() -> u64 {
    300
}

fn default_subscriber_backlog_alert() -> u64 {
    10_000
}

fn default_call_timeout_s() -> u64 {
    30
}

fn default_drain_timeout_s() -> u64 {
    60
}

impl Default for OperationalConfig {
    fn default() -> Self {
        OperationalConfig {
            stale_threshold_s: default_stale_threshold_s(),
            subscriber_backlog_alert: default_subscriber_backlog_alert(),
            call_timeout_s: default_call_timeout_s(),
            drain_timeout_s: default_drain_timeout_s(),
        }
    }
}

impl OperationalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_s)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_s)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_s)
    }
}

/// Loads a TOML config file, honoring an environment variable override
/// for the path — the same escape hatch `trusted-verifier::config::Config`
/// and `solver::config::SolverConfig` use so tests can point at fixtures
/// without touching the real filesystem layout.
pub fn load_toml<T: serde::de::DeserializeOwned>(
    env_var: &str,
    default_path: &str,
) -> anyhow::Result<T> {
    let path = std::env::var(env_var).unwrap_or_else(|_| default_path.to_string());
    if !std::path::Path::new(&path).exists() {
        anyhow::bail!(
            "configuration file '{}' not found. Set {} or create it from the template.",
            path,
            env_var
        );
    }
    let content = std::fs::read_to_string(&path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}
