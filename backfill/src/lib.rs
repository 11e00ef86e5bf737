//! Backfill Runner library surface: the batching/decoding loop lives
//! here so both the `escrow-backfill` binary and its tests can depend on
//! it the normal way, mirroring how the rest of this workspace keeps
//! logic in a library crate and binaries thin.

pub mod runner;

pub use runner::{BackfillReport, BackfillRunner};
