//! Lease-based work queue feeding the worker pool.
//!
//! The [`WorkQueue`] trait abstracts over queue backends (in-memory for
//! development and tests, Postgres for production) so the scheduler is not
//! tied to any specific broker. Entries carry a `not_before` timestamp for
//! delayed delivery; retry backoff is expressed as a delayed re-enqueue.
//! Mutual exclusion is NOT the queue's job — the job store's lease CAS
//! decides who actually runs a dequeued job.

use async_trait::async_trait;

use atelier_core::types::{JobId, Timestamp};

pub mod memory;
pub mod postgres;

/// Errors from a queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable scheduling queue with delayed delivery and dead-lettering.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a job id to the queue, optionally delayed until `not_before`.
    /// Dead-lettered jobs are never re-admitted.
    async fn enqueue(&self, job_id: JobId, not_before: Option<Timestamp>)
        -> Result<(), QueueError>;

    /// Take the next ready entry (its `not_before` has passed), or `None`
    /// when no work is ready. Best-effort FIFO by readiness time.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<JobId>, QueueError>;

    /// Re-enqueue after a failed attempt, delayed by the configured
    /// exponential backoff for that (1-based) attempt.
    async fn requeue_with_backoff(&self, job_id: JobId, attempt: u32) -> Result<(), QueueError>;

    /// Remove the job from scheduling permanently. The terminal job status
    /// was already written by the worker; this only stops future delivery.
    async fn dead_letter(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Ids that have been dead-lettered (for inspection).
    async fn dead_letter_ids(&self) -> Result<Vec<JobId>, QueueError>;
}
