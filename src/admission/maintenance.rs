//! Background decay and sweep tickers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::gate::AdmissionGate;

/// What one sweep reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub swept_at_ms: u64,
    /// Idle window records removed
    pub windows: usize,
    /// Expired bans removed
    pub bans: usize,
    /// Idle sequencing locks removed
    pub sequencers: usize,
}

/// Handle to the running maintenance task.
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(
    gate: Arc<AdmissionGate>,
    decay_every: Duration,
    sweep_every: Duration,
) -> MaintenanceHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        // The first tick of a plain interval fires at once; start one period in
        let start = Instant::now();
        let mut decay = interval_at(start + decay_every, decay_every);
        let mut sweep = interval_at(start + sweep_every, sweep_every);
        decay.set_missed_tick_behavior(MissedTickBehavior::Skip);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            decay_interval_ms = decay_every.as_millis() as u64,
            sweep_interval_ms = sweep_every.as_millis() as u64,
            "Starting admission maintenance"
        );

        loop {
            tokio::select! {
                _ = decay.tick() => {
                    let decayed = gate.decay();
                    debug!(decayed, "Decay tick");
                }
                _ = sweep.tick() => {
                    if let Err(e) = gate.sweep().await {
                        error!(error = %e, "Sweep failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Admission maintenance shutting down");
                        break;
                    }
                }
            }
        }
    });

    MaintenanceHandle { shutdown_tx, task }
}
