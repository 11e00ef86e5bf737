//! Indexer library surface: the Subscriber and Query API live here so the
//! binary stays thin and both are reachable from integration tests,
//! mirroring how the rest of this workspace keeps logic in a library
//! crate and binaries as a thin composition layer.

pub mod api;
pub mod health;
pub mod subscriber;

pub use health::HealthState;
pub use subscriber::SubscriberWorker;
