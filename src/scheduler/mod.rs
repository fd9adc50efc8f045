//! Monitoring scheduler.
//!
//! Drives periodic sweeps over every target and exposes the on-demand
//! single-target check. Ticks never overlap: a tick that lands while the
//! previous sweep is still running is skipped, not queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use crate::db::{DbError, Store};
use crate::live::LiveChannel;
use crate::monitor::{ProbeReport, Prober};

/// Upper bound on concurrently running probes within a sweep.
const SWEEP_CONCURRENCY: usize = 8;

/// Maximum random start delay per probe, so a sweep doesn't fire every
/// request in the same instant.
const PROBE_JITTER_MS: u64 = 250;

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<Prober>,
    live: Arc<LiveChannel>,
    interval: Duration,
    sweep_guard: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        prober: Arc<Prober>,
        live: Arc<LiveChannel>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            live,
            interval,
            sweep_guard: Mutex::new(()),
        }
    }

    /// Spawn the sweep loop: one immediate sweep, then fixed-interval
    /// ticks for the lifetime of the process.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        tracing::info!(interval_secs = scheduler.interval.as_secs(), "starting scheduler");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                // The first tick completes immediately
                ticker.tick().await;
                scheduler.sweep().await;
            }
        });
    }

    /// Check every target once, pushing each completed result to the
    /// live channel. Store failures are logged; the next tick retries.
    pub async fn sweep(&self) {
        let Ok(_guard) = self.sweep_guard.try_lock() else {
            tracing::warn!("previous sweep still running, skipping tick");
            return;
        };

        let targets = match self.store.get_targets() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "failed to enumerate targets, retrying next tick");
                return;
            }
        };

        tracing::info!(targets = targets.len(), "starting sweep");

        let semaphore = Arc::new(Semaphore::new(SWEEP_CONCURRENCY));
        let mut tasks = Vec::with_capacity(targets.len());

        for target in targets {
            let semaphore = semaphore.clone();
            let prober = self.prober.clone();
            let live = self.live.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let jitter = rand::random::<u64>() % PROBE_JITTER_MS;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                let report = prober.check_target(&target).await;
                live.broadcast(target.id, &report).await;
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "probe task panicked");
            }
        }

        let observers = self.live.observer_count().await;
        tracing::info!(
            down = self.prober.open_downtime_sessions(),
            observers = observers,
            "sweep complete"
        );
    }

    /// Probe exactly one target now and return its fresh result. The
    /// result is also pushed to observers like any other target update.
    pub async fn check_now(&self, target_id: i64) -> Result<ProbeReport, DbError> {
        let target = self.store.get_target(target_id)?;
        let report = self.prober.check_target(&target).await;
        self.live.broadcast(target.id, &report).await;
        Ok(report)
    }

    /// Forget scheduler-held state for a deleted target.
    pub fn remove_target(&self, target_id: i64) {
        self.prober.forget_target(target_id);
    }
}
