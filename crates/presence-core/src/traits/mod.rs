//! Core traits defined in `presence-core` and implemented by other crates.

pub mod cache;
pub mod ingestor;

pub use cache::{RemoteCacheTier, RemoteValue, RemoteWrite};
pub use ingestor::EventIngestor;
