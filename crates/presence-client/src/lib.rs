//! # presence-client
//!
//! [`ResilientApiClient`] fetches presence from the upstream REST API through
//! the shared rate limiter, circuit breaker and retrier, reading through and
//! writing through the dual-tier cache.

pub mod client;
pub mod metrics;
pub mod transport;

pub use client::{ClientSettings, ResilientApiClient};
pub use metrics::{ClientCounters, ClientDiagnostics};
pub use transport::{HttpTransport, PresenceTransport, QuotaHeaders, UpstreamResponse};
