//! Redis-backed remote tier.

pub mod client;
pub mod operations;

pub use client::RedisClient;
pub use operations::{RedisTier, spawn_connector};
