//! # presence-sync
//!
//! Keeps the presence cache in step with the real-time push channel:
//!
//! - [`PushHandler`] applies delivered presence updates to the cache
//! - [`Reconciler`] periodically compares what the push channel last showed
//!   with what was last applied, and repairs subjects whose updates were lost
//! - [`SnapshotStore`] is the in-process view of the push channel that the
//!   reconciler reads through the `EventIngestor` trait

pub mod ledger;
pub mod metrics;
pub mod push;
pub mod reconciler;
pub mod snapshot;

pub use ledger::{HashLedger, content_hash};
pub use metrics::SyncMetrics;
pub use push::PushHandler;
pub use reconciler::Reconciler;
pub use snapshot::SnapshotStore;
