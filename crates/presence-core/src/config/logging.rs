//! Logging configuration.

use serde::{Deserialize, Serialize};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, e.g. `"info"` or
    /// `"info,presence_cache=debug"`. `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include thread ids in every event.
    #[serde(default)]
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            thread_ids: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
