//! Periodic rotation trigger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::coordinator::{KeyRotationCoordinator, RotationRequest};
use crate::secrets::SecretsError;

/// Shortest period between scheduled rotations.
pub const MIN_ROTATION_INTERVAL: Duration = Duration::from_millis(10);

/// Handle for stopping a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler and wait for it to exit. A rotation already
    /// running is allowed to finish.
    pub async fn shutdown(self) {
        info!("Stopping rotation scheduler");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Rotation scheduler ended abnormally");
        }
    }
}

pub struct RotationScheduler;

impl RotationScheduler {
    /// Trigger a scheduled rotation every `interval`, first after one interval.
    /// Intervals below [`MIN_ROTATION_INTERVAL`] are clamped.
    pub fn spawn(coordinator: Arc<KeyRotationCoordinator>, interval: Duration) -> SchedulerHandle {
        if interval < MIN_ROTATION_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Rotation interval below minimum, clamping"
            );
        }
        let interval = interval.max(MIN_ROTATION_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Rotation scheduler started");

            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match coordinator.rotate(RotationRequest::scheduled()).await {
                            Ok(outcome) => {
                                info!(backup_id = %outcome.backup_id, "Scheduled key rotation completed");
                            }
                            Err(SecretsError::RotationInProgress) => {
                                info!("Skipping scheduled rotation, another rotation is running");
                            }
                            Err(e) => {
                                error!(error = %e, "Scheduled key rotation failed");
                            }
                        }
                    }

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Rotation scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, handle }
    }
}
