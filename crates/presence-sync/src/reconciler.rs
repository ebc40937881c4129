//! Periodic reconciliation of the cache against the push channel's view.
//!
//! ```text
//! stopped --start()--> running --stop()--> stopped
//! ```
//!
//! `start` sweeps immediately, then every interval. `stop` cancels the timer
//! and clears the hash ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use presence_cache::DualTierCache;
use presence_core::config::ReconciliationConfig;
use presence_core::shutdown::{self, ShutdownReceiver};
use presence_core::traits::EventIngestor;
use presence_core::types::RecordOrigin;

use crate::ledger::{HashLedger, content_hash};
use crate::metrics::SyncMetrics;
use crate::push;

#[derive(Debug)]
struct Shared {
    ingestor: Arc<dyn EventIngestor>,
    cache: Arc<DualTierCache>,
    ledger: Arc<HashLedger>,
    last_metrics: RwLock<Option<SyncMetrics>>,
    /// Serializes scheduled and forced sweeps.
    sweeping: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Detects subjects whose push updates were lost and rewrites them.
#[derive(Debug)]
pub struct Reconciler {
    shared: Arc<Shared>,
    interval: Duration,
    shutdown: ShutdownReceiver,
    running: Mutex<Option<Running>>,
}

impl Reconciler {
    /// Create a stopped reconciler.
    pub fn new(
        ingestor: Arc<dyn EventIngestor>,
        cache: Arc<DualTierCache>,
        ledger: Arc<HashLedger>,
        config: &ReconciliationConfig,
        shutdown: ShutdownReceiver,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ingestor,
                cache,
                ledger,
                last_metrics: RwLock::new(None),
                sweeping: tokio::sync::Mutex::new(()),
            }),
            interval: config.interval(),
            shutdown,
            running: Mutex::new(None),
        }
    }

    /// Start sweeping: once now, then every interval. No-op if running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Reconciler already running");
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let stopped = shutdown::signalled(stop_rx);
            let process_shutdown = shutdown::signalled(shutdown);
            tokio::pin!(stopped, process_shutdown);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = &mut process_shutdown => break,
                    _ = ticker.tick() => {
                        shared.sweep().await;
                    }
                }
            }
            info!("Reconciler loop exited");
        });

        info!(interval_secs = interval.as_secs(), "Reconciler started");
        *running = Some(Running { stop, handle });
    }

    /// Stop sweeping and forget every recorded hash.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { stop, handle }) = running {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Reconciler task ended abnormally");
            }
            info!("Reconciler stopped");
        }
        self.shared.ledger.clear();
    }

    /// Whether the periodic sweep is scheduled.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one sweep now, regardless of the schedule.
    pub async fn force_sweep(&self) -> SyncMetrics {
        self.shared.sweep().await
    }

    /// Metrics of the most recent sweep.
    pub fn last_metrics(&self) -> Option<SyncMetrics> {
        self.shared.last_metrics.read().clone()
    }
}

impl Shared {
    async fn sweep(&self) -> SyncMetrics {
        let _guard = self.sweeping.lock().await;
        let started = Instant::now();
        let mut metrics = SyncMetrics::begin();

        match self.ingestor.tracked_subjects().await {
            Ok(subjects) => {
                for subject_id in subjects {
                    metrics.subjects_swept += 1;
                    self.reconcile(&subject_id, &mut metrics).await;
                }
            }
            Err(e) => {
                metrics.ingest_errors += 1;
                warn!(error = %e, "Event ingestor could not list subjects, sweep skipped");
            }
        }

        metrics.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            subjects_swept = metrics.subjects_swept,
            new_subjects = metrics.new_subjects,
            mismatches = metrics.mismatches,
            repairs_attempted = metrics.repairs_attempted,
            repairs_succeeded = metrics.repairs_succeeded,
            repairs_failed = metrics.repairs_failed,
            ingest_errors = metrics.ingest_errors,
            duration_ms = metrics.duration_ms,
            "Reconciliation sweep complete"
        );
        *self.last_metrics.write() = Some(metrics.clone());
        metrics
    }

    async fn reconcile(&self, subject_id: &str, metrics: &mut SyncMetrics) {
        let snapshot = match self.ingestor.snapshot(subject_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                metrics.ingest_errors += 1;
                warn!(subject_id, error = %e, "Failed to read snapshot");
                return;
            }
        };
        let hash = match content_hash(&snapshot) {
            Ok(hash) => hash,
            Err(e) => {
                metrics.ingest_errors += 1;
                warn!(subject_id, error = %e, "Failed to hash snapshot");
                return;
            }
        };

        match self.ledger.get(subject_id) {
            None => {
                metrics.new_subjects += 1;
                self.ledger.record(subject_id, hash);
            }
            Some(previous) if previous == hash => {}
            Some(_) => {
                metrics.mismatches += 1;
                metrics.repairs_attempted += 1;
                info!(
                    subject_id,
                    status = snapshot.status.as_str(),
                    "Missed presence event detected, repairing"
                );
                let record = snapshot.into_record(subject_id, RecordOrigin::Reconciliation, Utc::now());
                let outcome = push::apply(&self.cache, &self.ledger, &record, hash).await;
                if outcome.is_ok() {
                    metrics.repairs_succeeded += 1;
                } else {
                    metrics.repairs_failed += 1;
                }
            }
        }
    }
}
