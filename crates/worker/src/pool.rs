//! The bounded worker pool.
//!
//! `concurrency_limit` identical workers each run a sequential loop:
//! dequeue, try to lease, process. A lost lease race is not an error —
//! another worker simply got there first.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use atelier_core::config::PipelineConfig;
use atelier_db::store::StoreError;

use crate::{runner, PipelineDeps};

/// How long an idle worker sleeps when the queue has nothing ready.
const IDLE_SLEEP: Duration = Duration::from_millis(250);

/// Bounded pool of job executors.
pub struct WorkerPool {
    deps: PipelineDeps,
    config: PipelineConfig,
}

impl WorkerPool {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self { deps, config }
    }

    /// Spawn `concurrency_limit` workers onto the returned [`JoinSet`].
    ///
    /// Workers run until `cancel` is triggered; in-flight jobs finish
    /// their current processing step before the loop exits.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for index in 0..self.config.concurrency_limit {
            let worker = Worker {
                id: format!("worker-{index}"),
                deps: self.deps.clone(),
                config: self.config.clone(),
            };
            let cancel = cancel.clone();
            tasks.spawn(async move { worker.run(cancel).await });
        }
        tracing::info!(
            count = self.config.concurrency_limit,
            "Worker pool started",
        );
        tasks
    }
}

/// A single executor. Fully sequential internally; all cross-worker
/// coordination goes through the job store and the queue.
struct Worker {
    id: String,
    deps: PipelineDeps,
    config: PipelineConfig,
}

impl Worker {
    async fn run(&self, cancel: CancellationToken) {
        tracing::debug!(worker_id = %self.id, "Worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(worker_id = %self.id, "Worker shutting down");
                    break;
                }
                result = self.step() => {
                    match result {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
                        Err(e) => {
                            tracing::error!(worker_id = %self.id, error = %e, "Worker step failed");
                            tokio::time::sleep(IDLE_SLEEP).await;
                        }
                    }
                }
            }
        }
    }

    /// One iteration. Returns `Ok(true)` when a job was handled (leased or
    /// lost to a racing worker) and `Ok(false)` when the queue was empty.
    async fn step(&self) -> Result<bool, StoreError> {
        let Some(job_id) = self
            .deps
            .queue
            .dequeue(&self.id)
            .await
            .map_err(|e| StoreError::Conflict(e.to_string()))?
        else {
            return Ok(false);
        };

        if !self
            .deps
            .store
            .try_lease(job_id, &self.id, self.config.lease_duration)
            .await?
        {
            // Another worker holds a valid lease, or the job is already
            // settled. Either way, not ours.
            tracing::debug!(job_id = %job_id, worker_id = %self.id, "Lease not acquired");
            return Ok(true);
        }

        runner::process(&self.deps, &self.config, &self.id, job_id).await?;
        Ok(true)
    }
}
