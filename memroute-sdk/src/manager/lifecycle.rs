//! Background maintenance tasks.
//!
//! Four independent periodic tasks run once started:
//!
//! | task               | interval (default) |
//! |--------------------|--------------------|
//! | cache expiry sweep | 60 s               |
//! | sync queue drain   | 5 s                |
//! | metrics recompute  | 30 s               |
//! | prediction refresh | 300 s              |
//!
//! Nothing is spawned by the constructor. `shutdown` signals every task and
//! waits for it to exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::metrics::MetricsSummary;
use super::unified::UnifiedMemoryManager;
use crate::flow::{DrainReport, FlowOptimizer};
use crate::routing::RoutingEngine;

/// Handles for running background tasks
pub(crate) struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

/// What one maintenance cycle did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub sync: DrainReport,
    pub predictions_refreshed: usize,
    pub metrics: MetricsSummary,
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> (&'static str, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "Background task stopped");
    });
    (name, handle)
}

async fn drain_and_record(flow: &FlowOptimizer, routing: &RoutingEngine) -> DrainReport {
    let report = flow.drain_sync_queue().await;
    for (identifier, backend) in &report.replicated {
        routing.record_location(identifier, *backend);
    }
    if report.failed > 0 {
        warn!(failed = report.failed, remaining = report.remaining, "Sync items failed");
    }
    report
}

impl UnifiedMemoryManager {
    /// Start the periodic tasks. Returns false if they are already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_background_tasks(&self) -> bool {
        let mut guard = self.background.lock();
        if guard.is_some() {
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let mut handles = Vec::new();

        let flow = Arc::clone(&self.flow);
        handles.push(spawn_periodic(
            "cache-sweep",
            self.config.cache.sweep_interval_secs,
            rx.clone(),
            move || {
                let flow = Arc::clone(&flow);
                async move {
                    let expired = flow.purge_expired();
                    if expired > 0 {
                        debug!(expired, "Cache sweep");
                    }
                }
            },
        ));

        if self.config.sync.enabled {
            let flow = Arc::clone(&self.flow);
            let routing = Arc::clone(&self.routing);
            handles.push(spawn_periodic(
                "sync-drain",
                self.config.sync.drain_interval_secs,
                rx.clone(),
                move || {
                    let flow = Arc::clone(&flow);
                    let routing = Arc::clone(&routing);
                    async move {
                        drain_and_record(&flow, &routing).await;
                    }
                },
            ));
        }

        let metrics = Arc::clone(&self.metrics);
        let clock = self.clock.clone();
        handles.push(spawn_periodic(
            "metrics",
            self.config.metrics.recalc_interval_secs,
            rx.clone(),
            move || {
                let metrics = Arc::clone(&metrics);
                let now = clock.now();
                async move {
                    metrics.recalculate(now);
                }
            },
        ));

        if self.config.prediction.enabled {
            let flow = Arc::clone(&self.flow);
            handles.push(spawn_periodic(
                "prediction-refresh",
                self.config.prediction.refresh_interval_secs,
                rx,
                move || {
                    let flow = Arc::clone(&flow);
                    async move {
                        let refreshed = flow.refresh_predictions();
                        debug!(refreshed, "Prediction patterns refreshed");
                    }
                },
            ));
        }

        info!(tasks = handles.len(), "Background tasks started");
        *guard = Some(BackgroundTasks {
            shutdown: tx,
            handles,
        });
        true
    }

    pub fn is_background_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Stop the periodic tasks and wait for them to exit
    pub async fn shutdown(&self) {
        let Some(tasks) = self.background.lock().take() else {
            return;
        };

        let _ = tasks.shutdown.send(true);
        for (name, handle) in tasks.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }

    /// Run every maintenance step once, in the calling task
    pub async fn run_maintenance_cycle(&self) -> MaintenanceReport {
        let expired = self.flow.purge_expired();
        let sync = drain_and_record(&self.flow, &self.routing).await;
        let predictions_refreshed = self.flow.refresh_predictions();
        let metrics = self.metrics.recalculate(self.clock.now());
        debug!(expired, synced = sync.succeeded, predictions_refreshed, "Maintenance cycle");

        MaintenanceReport {
            expired,
            sync,
            predictions_refreshed,
            metrics,
        }
    }
}

impl Drop for UnifiedMemoryManager {
    fn drop(&mut self) {
        if let Some(tasks) = self.background.get_mut().take() {
            let _ = tasks.shutdown.send(true);
            for (_, handle) in tasks.handles {
                handle.abort();
            }
        }
    }
}
