//! # presence-core
//!
//! Core crate for the presence relay. Contains the presence data model,
//! the upstream wire shapes, the collaborator traits (remote cache tier,
//! event ingestor), configuration schemas, the shutdown signal helpers,
//! and the unified error system.
//!
//! This crate has **no** internal dependencies on other relay crates.

pub mod config;
pub mod error;
pub mod result;
pub mod shutdown;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
