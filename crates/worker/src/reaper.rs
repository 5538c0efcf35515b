//! Crash recovery: reclaim jobs whose lease expired without completion.
//!
//! A worker that dies mid-job stops extending its lease. Once the lease
//! passes its expiry the job is silently returned to `Pending` and
//! re-enqueued for another worker. This is not a job error and consumes
//! no attempt by itself.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::PipelineDeps;

/// Periodic lease-expiry sweep.
pub struct LeaseReaper {
    deps: PipelineDeps,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(deps: PipelineDeps, interval: Duration) -> Self {
        Self { deps, interval }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Lease reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Lease reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Lease sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep: reclaim expired leases and make the jobs schedulable.
    pub async fn sweep(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let reclaimed = self.deps.store.reclaim_expired(Utc::now()).await?;
        for job_id in &reclaimed {
            tracing::warn!(job_id = %job_id, "Lease expired; re-enqueueing job");
            self.deps.queue.enqueue(*job_id, None).await?;
        }
        Ok(reclaimed.len())
    }
}
