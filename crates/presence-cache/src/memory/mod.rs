//! In-process cache tier.

pub mod store;

pub use store::{CacheEntry, MemoryTier};
