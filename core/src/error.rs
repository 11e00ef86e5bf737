//! Typed error taxonomy for the ingestion pipeline.
//!
//! Mirrors the transient/deliverable/logical/fatal split in the design
//! notes: callers match on these variants to decide whether to retry
//! locally, nack for broker redelivery, or halt the process.

use thiserror::Error;

/// Errors raised by the Event Codec (§4.1).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown event signature {0}")]
    UnknownEvent(String),

    #[error("malformed payload for {event_type} on log {log_ref}: {reason}")]
    MalformedPayload {
        event_type: String,
        log_ref: String,
        reason: String,
    },

    #[error("invalid wire format: {0}")]
    InvalidWireFormat(String),
}

/// Errors raised by the Projection Engine (§4.6).
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event rejected: transition {from:?} -> {event} violates lifecycle monotonicity")]
    LifecycleViolation { from: Option<String>, event: String },
}

/// Errors raised by the `EventBus` abstraction (§4.4/§4.5).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transient broker error, retry: {0}")]
    Transient(String),

    #[error("broker resource exhausted, apply back-pressure")]
    ResourceExhausted,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BusError {
    /// Whether the caller should retry locally (transient) vs. treat the
    /// failure as fatal for the current batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Transient(_) | BusError::ResourceExhausted)
    }
}

/// Fatal anomalies that halt the process with a distinct exit code (§6, §7).
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("reorg past confirmation depth on chain {chain_id}: head moved behind checkpoint {checkpoint_block}")]
    DeepReorg { chain_id: u64, checkpoint_block: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Config(_) => 1,
            FatalError::DeepReorg { .. } => 2,
            FatalError::CheckpointUnavailable(_) => 3,
        }
    }
}
