//! Background Reconciler: a single long-lived loop that periodically asks
//! the Manager to advance every active branch toward the catalog's head.
//! Cancellation is cooperative, mirroring the shutdown pattern used
//! elsewhere in this codebase: a `CancellationToken` checked in a
//! `tokio::select!` around the sleep, so a shutdown signal mid-tick still
//! lets the in-flight tick finish before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::MigrationManager;

const STARTUP_DELAY: Duration = Duration::from_secs(30);
const TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct Reconciler {
    manager: Arc<MigrationManager>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(manager: Arc<MigrationManager>, cancel: CancellationToken) -> Self {
        Self { manager, cancel }
    }

    pub async fn run(self) {
        tokio::select! {
            _ = sleep(STARTUP_DELAY) => {}
            _ = self.cancel.cancelled() => {
                info!("reconciler cancelled during startup delay");
                return;
            }
        }

        loop {
            let result = self.manager.apply_all().await;
            info!(
                success = result.success,
                branches = result.results.len(),
                duration_ms = result.duration.as_millis() as u64,
                "reconciler tick complete"
            );

            tokio::select! {
                _ = sleep(TICK_INTERVAL) => {}
                _ = self.cancel.cancelled() => {
                    info!("reconciler shutting down after current tick");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_matches_contract() {
        assert_eq!(TICK_INTERVAL, Duration::from_secs(300));
        assert_eq!(STARTUP_DELAY, Duration::from_secs(30));
    }
}
