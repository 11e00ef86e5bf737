//! Projection database access: row types, the checkpoint store, and the
//! projection engine.

pub mod checkpoint;
pub mod models;
pub mod projection;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use models::{ApprovalRow, CheckpointRow, EscrowEventRow, EscrowRow, EscrowStatus};
pub use projection::{ApplyOutcome, ProjectionEngine};
