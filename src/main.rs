//! Presence Relay: cached, rate-limited presence for a chat platform.
//!
//! Wires the cache, the resilient API client and the reconciler together and
//! runs until Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt};

use presence_cache::DualTierCache;
use presence_client::{HttpTransport, ResilientApiClient};
use presence_core::config::{AppConfig, LogFormat};
use presence_core::error::AppError;
use presence_core::shutdown;
use presence_resilience::BackoffPolicy;
use presence_sync::{HashLedger, PushHandler, Reconciler, SnapshotStore};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Relay error");
        std::process::exit(1);
    }
}

/// Load `config/default.toml`, the `PRESENCE_ENV` overlay and `PRESENCE__*`
/// environment variables.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("PRESENCE_ENV").unwrap_or_else(|_| "development".to_string());
    let dir = std::env::var("PRESENCE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    AppConfig::load_from(&dir, &env)
}

/// Initialize tracing. `RUST_LOG` overrides the configured level.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(config.logging.thread_ids);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Presence Relay v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut background: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    // ── Cache ────────────────────────────────────────────────────
    let cache = if config.cache.remote_enabled {
        let cache = Arc::new(DualTierCache::new(&config.cache));
        tracing::info!("Connecting remote cache tier in the background...");
        background.push((
            "redis-connector",
            presence_cache::redis::spawn_connector(
                Arc::clone(&cache),
                config.cache.redis.clone(),
                BackoffPolicy::from(&config.retry.cache_reconnect),
                shutdown_rx.clone(),
            ),
        ));
        cache
    } else {
        tracing::info!("Remote cache tier disabled, in-process tier only");
        Arc::new(DualTierCache::local_only(&config.cache))
    };
    background.push(("cache-sweeper", cache.spawn_sweeper(shutdown_rx.clone())));

    // ── Upstream client ──────────────────────────────────────────
    let transport = Arc::new(HttpTransport::new(&config.upstream)?);
    let client = Arc::new(ResilientApiClient::new(
        transport,
        Arc::clone(&cache),
        &config,
        shutdown_rx.clone(),
    ));
    tracing::info!(base_url = %config.upstream.base_url, "Upstream client ready");

    // ── Push path + reconciliation ───────────────────────────────
    let store = Arc::new(SnapshotStore::new());
    let ledger = Arc::new(HashLedger::new());
    // Handed to the gateway connection, which feeds it every presence update.
    let push = PushHandler::new(Arc::clone(&cache), Arc::clone(&ledger), Arc::clone(&store));
    tracing::debug!(handler = ?push, "Push handler ready");
    let reconciler = Reconciler::new(
        store,
        Arc::clone(&cache),
        ledger,
        &config.reconciliation,
        shutdown_rx.clone(),
    );
    if config.reconciliation.enabled {
        reconciler.start();
    } else {
        tracing::info!("Reconciliation disabled");
    }

    // ── Warm-up ──────────────────────────────────────────────────
    let warmup = &config.batch.warmup_subjects;
    if !warmup.is_empty() {
        let warmed = tokio::select! {
            records = client.fetch_batch(warmup) => Some(records.len()),
            _ = shutdown_signal() => None,
        };
        match warmed {
            Some(count) => tracing::info!(
                requested = warmup.len(),
                warmed = count,
                "Cache warm-up complete"
            ),
            None => {
                tracing::info!("Shutdown signal received during warm-up");
                return shutdown_all(shutdown_tx, &reconciler, &client, background).await;
            }
        }
    }

    tracing::info!("Presence Relay running");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
    shutdown_all(shutdown_tx, &reconciler, &client, background).await
}

async fn shutdown_all(
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    reconciler: &Reconciler,
    client: &ResilientApiClient,
    background: Vec<(&'static str, JoinHandle<()>)>,
) -> Result<(), AppError> {
    let _ = shutdown_tx.send(true);
    reconciler.stop().await;

    tracing::info!("Waiting for background tasks to complete...");
    for (name, handle) in background {
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            tracing::warn!(task = name, "Background task did not stop in time");
        }
    }

    let diagnostics = client.metrics();
    tracing::info!(
        requests = diagnostics.counters.requests,
        upstream_calls = diagnostics.counters.upstream_calls,
        failures = diagnostics.counters.failures,
        retries = diagnostics.counters.retries,
        "Presence Relay shut down gracefully"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
