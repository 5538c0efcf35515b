//! The [`JobStore`] trait: contract of the durable job record.

use std::time::Duration;

use async_trait::async_trait;

use atelier_core::outcome::JobOutcome;
use atelier_core::types::{JobId, Timestamp};

use crate::models::job::{CreateJob, Job};

/// Errors surfaced by a job store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The operation lost a race, e.g. `begin_attempt` by a worker whose
    /// lease was taken over in the meantime.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of every job and its lifecycle state.
///
/// All mutating operations are atomic with respect to concurrent lease
/// attempts. `try_lease` is the only operation allowed to move a job out
/// of `Pending`; `finalize` is a compare-and-set and returns whether this
/// caller performed the terminal transition. Implementations are injected
/// as `Arc<dyn JobStore>` — there is no process-wide singleton.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `Pending` with zero attempts.
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Look up the job correlated with a provider-side request id.
    async fn find_by_provider_ref(&self, provider_ref: &str)
        -> Result<Option<Job>, StoreError>;

    /// List a caller's jobs, newest first.
    async fn list_by_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Atomically claim the job for `holder`.
    ///
    /// Succeeds only when the job is `Pending` (or its previous lease has
    /// expired — the crash-recovery path). Returns `false` when another
    /// worker holds a valid lease or the job is past `Pending`. This is the
    /// single mutual-exclusion point of the pipeline.
    async fn try_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError>;

    /// Renew the lease. Returns `false` when `holder` no longer owns it.
    async fn extend_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError>;

    /// Move a leased job to `Processing` and increment `attempts`.
    ///
    /// Returns the new attempt count.
    async fn begin_attempt(&self, id: JobId, holder: &str) -> Result<i32, StoreError>;

    /// Record the provider-side request id for callback correlation.
    async fn set_provider_ref(&self, id: JobId, provider_ref: &str) -> Result<(), StoreError>;

    /// Update progress. Values are clamped to 0..=100 and never decrease.
    async fn update_progress(&self, id: JobId, pct: i16) -> Result<(), StoreError>;

    /// Compare-and-set into the terminal state described by `outcome`.
    ///
    /// Returns `true` when this call performed the transition, `false` when
    /// the job was already terminal (a no-op, not an error). `result` is
    /// written only for `Succeeded`.
    async fn finalize(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError>;

    /// Set the cancellation flag. Does not change the status; the worker
    /// observes the flag at its next poll tick. Returns `false` when the
    /// job is already terminal.
    async fn request_cancel(&self, id: JobId) -> Result<bool, StoreError>;

    /// Return a non-terminal job to `Pending` so it can be leased again
    /// (retry path). Clears the lease. Returns `false` when the job is
    /// terminal.
    async fn release_to_pending(&self, id: JobId) -> Result<bool, StoreError>;

    /// Reclaim jobs whose lease expired before `now` without completion:
    /// atomically back to `Pending`, lease cleared, attempts untouched.
    /// Returns the reclaimed ids so the scheduler can re-enqueue them.
    async fn reclaim_expired(&self, now: Timestamp) -> Result<Vec<JobId>, StoreError>;
}
