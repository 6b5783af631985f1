//! Periodic lapse sweep.

use super::reconciler::Reconciler;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Spawn the sweep loop. A zero interval disables it.
pub fn spawn_lapse_sweep(reconciler: Reconciler, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    info!(interval_secs = interval.as_secs(), "Starting lapse sweep");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match reconciler.sweep_lapsed().await {
                Ok(report) if report.examined > 0 => {
                    info!(
                        examined = report.examined,
                        cancelled = report.cancelled,
                        expired = report.expired,
                        conflicts = report.conflicts,
                        invalid = report.invalid,
                        "Lapse sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Lapse sweep failed"),
            }
        }
    }))
}
