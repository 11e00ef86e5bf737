//! Metric names and the Prometheus exporter install, shared by all three
//! binaries. Each binary calls [`install_recorder`] once at startup and
//! then just uses the `metrics` crate's macros inline at the call sites
//! — there is no central "metrics service" to talk to.

use metrics_exporter_prometheus::PrometheusBuilder;

pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
pub const EVENTS_PROJECTED_TOTAL: &str = "events_projected_total";
pub const TAILER_LAG_BLOCKS: &str = "tailer_lag_blocks";
pub const SUBSCRIBER_BACKLOG_MESSAGES: &str = "subscriber_backlog_messages";
pub const PROJECTION_LATENCY_MS: &str = "projection_latency_ms";
pub const DEAD_LETTERS_TOTAL: &str = "dead_letters_total";
pub const CODEC_ERRORS_TOTAL: &str = "codec_errors_total";

/// Binds the process metrics registry to a Prometheus exporter listening
/// on `addr`, and describes every metric name so `/metrics` carries HELP
/// text even before the first sample.
pub fn install_recorder(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    metrics::describe_counter!(EVENTS_PUBLISHED_TOTAL, "Domain events published to the bus");
    metrics::describe_counter!(EVENTS_PROJECTED_TOTAL, "Domain events applied to the projection, by outcome");
    metrics::describe_gauge!(TAILER_LAG_BLOCKS, "Chain head minus last_safe_block, per chain");
    metrics::describe_gauge!(SUBSCRIBER_BACKLOG_MESSAGES, "Undelivered messages waiting in the bus");
    metrics::describe_histogram!(PROJECTION_LATENCY_MS, "Time spent inside ProjectionEngine::apply");
    metrics::describe_counter!(DEAD_LETTERS_TOTAL, "Messages dead-lettered after exhausting delivery attempts");
    metrics::describe_counter!(CODEC_ERRORS_TOTAL, "Malformed payloads on a recognized event signature, skipped");

    Ok(())
}
