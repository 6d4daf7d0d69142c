use crate::services::job_store::JobStore;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Periodically evicts finished jobs so the in-memory store stays bounded
pub struct JobReaper {
    store: JobStore,
    retention: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl JobReaper {
    pub fn new(
        store: JobStore,
        retention: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            retention,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Job reaper started (retention={:?})", self.retention);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Job reaper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.reap();
                }
            }
        }
    }

    /// Removes jobs finished longer than the retention period ago
    pub fn reap(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let removed = self.store.purge_finished_before(Utc::now() - retention);

        if removed > 0 {
            tracing::info!("🧹 Evicted {} finished job(s)", removed);
        }
        removed
    }
}
