//! # presence-cache
//!
//! Dual-tier cache for presence records:
//!
//! - **memory**: in-process tier over [dashmap](https://crates.io/crates/dashmap)
//!   with per-entry expiry, kept past expiry for the degraded read path
//! - **redis**: shared tier using the [redis](https://crates.io/crates/redis)
//!   crate, with an atomic last-write-wins script
//!
//! [`DualTierCache`] combines the two and never fails a caller because the
//! remote tier is down.

pub mod dual;
pub mod keys;
pub mod memory;
pub mod redis;

pub use dual::{CacheStats, DualTierCache, RemoteOutcome, WriteOutcome};
pub use memory::{CacheEntry, MemoryTier};
