//! Periodic sweep that skips expired draft turns, plus the lease heartbeat.
//!
//! Each tick lists matches with a running draft and asks the coordinator to
//! skip the current slot where its deadline passed. The coordinator takes the
//! per-match lock and the ownership lease, so replicas can all run a monitor;
//! matches owned elsewhere are counted and left alone. An error on one match is
//! logged and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::{MatchCoordinator, SkipOutcome};
use crate::error::MatchError;

/// Counters for one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Matches with a running draft.
    pub scanned: usize,
    /// Slots skipped this sweep.
    pub skipped: usize,
    pub not_owner: usize,
    pub failed: usize,
}

pub struct TimeoutMonitor {
    coordinator: Arc<MatchCoordinator>,
    interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(coordinator: Arc<MatchCoordinator>) -> Self {
        let interval = coordinator.config().sweep_interval;
        Self {
            coordinator,
            interval,
        }
    }

    /// Run one pass over all active drafts.
    pub async fn sweep(&self) -> Result<SweepReport, MatchError> {
        let active = self.coordinator.match_storage().active_drafts().await?;
        let mut report = SweepReport {
            scanned: active.len(),
            ..Default::default()
        };

        for match_id in &active {
            match self.coordinator.skip_if_expired(match_id).await {
                Ok(SkipOutcome::Skipped { .. }) => report.skipped += 1,
                Ok(SkipOutcome::NotOwner) => report.not_owner += 1,
                Ok(SkipOutcome::NotExpired | SkipOutcome::Inactive) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(match_id = %match_id, error = %e, "timeout check failed");
                }
            }
        }

        let reaped = self
            .coordinator
            .locks()
            .reap_idle(self.coordinator.config().lock_idle_ttl);
        if report.skipped > 0 || report.failed > 0 {
            info!(?report, reaped, "sweep finished");
        } else {
            debug!(?report, reaped, "sweep finished");
        }
        Ok(report)
    }

    /// Start sweeping every `sweep_interval` until the handle is shut down.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let coordinator = self.coordinator.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut heartbeat =
                tokio::time::interval(self.coordinator.config().heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                backend = %self.coordinator.config().backend_id,
                interval_ms = self.interval.as_millis() as u64,
                "timeout monitor started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "sweep failed");
                        }
                    }
                    _ = heartbeat.tick() => {
                        let report = self.coordinator.heartbeat().await;
                        if report.lost > 0 || report.failed > 0 {
                            warn!(?report, "lease heartbeat");
                        } else {
                            debug!(?report, "lease heartbeat");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("timeout monitor stopped");
        });

        MonitorHandle {
            shutdown_tx,
            task,
            coordinator,
        }
    }
}

/// Running monitor task.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    coordinator: Arc<MatchCoordinator>,
}

impl MonitorHandle {
    /// Stop the sweep loop, wait for the in-flight sweep, and release leases.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "timeout monitor task failed");
        }
        self.coordinator.shutdown().await
    }
}
