//! Periodic background refresh of cached secrets.
//!
//! The task holds only a weak reference to the store, so an abandoned store
//! is freed and the task exits at its next tick.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::SecretStore;

/// Shortest period the refresh loop runs at.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Handle for stopping a running refresher.
#[derive(Debug)]
pub struct RefresherHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefresherHandle {
    /// Signal the task and wait for it to exit. A tick already in progress
    /// completes first.
    pub async fn shutdown(self) {
        info!("Stopping background secret refresh");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Background refresh task ended abnormally");
        }
    }
}

/// Spawns the refresh loop.
pub struct BackgroundRefresher;

impl BackgroundRefresher {
    /// Start refreshing `store` every `interval`, clamped to
    /// [`MIN_REFRESH_INTERVAL`]. The first tick fires after one full interval.
    pub fn spawn(store: &SecretStore, interval: Duration) -> RefresherHandle {
        if interval < MIN_REFRESH_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Refresh interval below minimum, clamping"
            );
        }
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak = store.downgrade();

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Background secret refresh started");

            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(store) = weak.upgrade() else {
                            debug!("Secret store dropped, stopping refresh");
                            break;
                        };
                        refresh_tick(&store).await;
                    }

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Background secret refresh stopped");
        });

        RefresherHandle { shutdown_tx, handle }
    }
}

/// Refresh every cached key that no rotation is touching.
async fn refresh_tick(store: &SecretStore) {
    let keys: Vec<String> =
        store.cached_keys().into_iter().filter(|key| !store.is_rotating(key)).collect();

    if keys.is_empty() {
        return;
    }

    let results = futures::future::join_all(keys.iter().map(|key| store.refresh(key))).await;

    let mut failed = 0usize;
    for (key, result) in keys.iter().zip(results) {
        if let Err(e) = result {
            failed += 1;
            warn!(key = %key, error = %e, "Background refresh failed; keeping cached value");
        }
    }

    debug!(refreshed = keys.len() - failed, failed, "Background refresh tick complete");
}
