//! Shared domain types, event codec, projection engine, bus abstraction,
//! and configuration plumbing for the escrow indexing pipeline.
//!
//! The three binaries (`escrow-relayer`, `escrow-indexer`,
//! `escrow-backfill`) all depend on this crate and share nothing else —
//! every cross-cutting concern (codec, projection SQL, checkpointing,
//! bus trait, config loading, error taxonomy) lives here exactly once.

pub mod backoff;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod metrics;
pub mod rpc;

pub use backoff::{retry_rpc, Backoff};
pub use bus::{Delivery, EventBus, PgEventBus, Publisher, Subscriber};
pub use config::{load_toml, BusConfig, ChainConfig, DbConfig, OperationalConfig};
pub use db::{ApplyOutcome, Checkpoint, CheckpointStore, ProjectionEngine};
pub use error::{BusError, CodecError, FatalError, ProjectionError};
pub use events::{DomainEvent, Envelope, RawLog};
pub use rpc::{EvmClient, RpcError};
