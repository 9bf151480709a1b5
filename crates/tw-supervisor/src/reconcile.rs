//! Reconciliation loop
//!
//! Every interval the reconciler walks the enabled tunnels and starts the ones
//! whose process has disappeared. The first tick fires immediately, which is
//! how enabled tunnels come back after a host restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::RetryState;
use crate::fleet::{Convergence, Fleet};

/// Shortest sweep interval accepted from configuration
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Enabled tunnels examined
    pub checked: usize,
    /// Tunnels that were restarted
    pub started: usize,
    /// Tunnels whose start attempt failed
    pub failed: usize,
    /// Tunnels skipped while backing off
    pub deferred: usize,
}

/// Periodic convergence of actual to desired state
pub struct Reconciler {
    fleet: Arc<Fleet>,
    retries: Mutex<HashMap<String, RetryState>>,
}

impl Reconciler {
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self {
            fleet,
            retries: Mutex::new(HashMap::new()),
        }
    }

    /// Run sweeps until cancelled; an in-flight sweep always completes
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.fleet.config().reconcile_interval.max(MIN_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Starting reconciliation loop (interval: {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep().await;
                    if report.started > 0 || report.failed > 0 {
                        tracing::info!(
                            "Sweep: {} checked, {} started, {} failed, {} deferred",
                            report.checked,
                            report.started,
                            report.failed,
                            report.deferred
                        );
                    } else {
                        tracing::debug!("Sweep: {} checked, all converged", report.checked);
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation loop shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over every enabled tunnel
    ///
    /// A tunnel's failure is logged and never stops the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let enabled = self.fleet.store().list_enabled().await;
        let mut report = SweepReport::default();
        self.forget_retries_except(enabled.iter().map(|(name, _)| name.as_str()));

        for (name, _) in enabled {
            report.checked += 1;

            if !self.ready(&name) {
                tracing::debug!("Tunnel {} is backing off", name);
                report.deferred += 1;
                continue;
            }

            match self.fleet.ensure_running(&name).await {
                Ok(Convergence::Started { pid }) => {
                    tracing::info!("Restarted tunnel {} (PID: {})", name, pid);
                    report.started += 1;
                    self.record_success(&name);
                }
                Ok(Convergence::AlreadyRunning) => self.record_success(&name),
                Ok(Convergence::NotWanted) => self.forget(&name),
                Err(e) => {
                    report.failed += 1;
                    let (failures, delay) = self.record_failure(&name);
                    tracing::warn!(
                        "Failed to restart tunnel {} (attempt {}, next in {:?}): {}",
                        name,
                        failures,
                        delay,
                        e
                    );
                }
            }
        }

        report
    }

    /// Consecutive failed starts recorded for a tunnel
    pub fn failures(&self, name: &str) -> u32 {
        self.retries()
            .get(name)
            .map(RetryState::failures)
            .unwrap_or(0)
    }

    fn ready(&self, name: &str) -> bool {
        self.retries()
            .get(name)
            .map_or(true, |state| state.ready(Instant::now()))
    }

    fn record_failure(&self, name: &str) -> (u32, Duration) {
        let mut retries = self.retries();
        let state = retries
            .entry(name.to_string())
            .or_insert_with(|| RetryState::new(&self.fleet.config().backoff));
        let delay = state.record_failure(Instant::now());
        (state.failures(), delay)
    }

    fn record_success(&self, name: &str) {
        if let Some(state) = self.retries().get_mut(name) {
            state.record_success();
        }
    }

    fn forget(&self, name: &str) {
        self.retries().remove(name);
    }

    fn forget_retries_except<'a>(&self, names: impl Iterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = names.collect();
        self.retries().retain(|name, _| keep.contains(name.as_str()));
    }

    fn retries(&self) -> std::sync::MutexGuard<'_, HashMap<String, RetryState>> {
        // The map holds plain counters, so a poisoned lock is still usable
        self.retries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
