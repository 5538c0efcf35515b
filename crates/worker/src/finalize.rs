//! The single finalize entry point.
//!
//! Every path that ends a job — the worker poll loop, the inbound provider
//! callback, cancellation — funnels through [`finalize_job`]. The job
//! store's compare-and-set decides which caller actually performs the
//! transition; only that caller emits the terminal notification, so a job
//! finalized twice produces exactly one terminal event.

use atelier_core::outcome::JobOutcome;
use atelier_core::types::JobId;
use atelier_db::store::StoreError;
use atelier_events::JobEvent;

use crate::PipelineDeps;

/// Finalize a job with the given outcome.
///
/// Returns `true` when this call performed the terminal transition,
/// `false` when the job was already terminal (no event is emitted).
pub async fn finalize_job(
    deps: &PipelineDeps,
    job_id: JobId,
    outcome: &JobOutcome,
) -> Result<bool, StoreError> {
    if !deps.store.finalize(job_id, outcome).await? {
        tracing::debug!(job_id = %job_id, "Job already finalized; skipping");
        return Ok(false);
    }

    let Some(job) = deps.store.get(job_id).await? else {
        return Err(StoreError::NotFound(job_id));
    };

    tracing::info!(
        job_id = %job_id,
        status = job.status().name(),
        attempts = job.attempts,
        "Job finalized",
    );

    deps.notifier
        .publish_job_event(JobEvent::terminal(job_id, &job.owner_id, outcome))
        .await;
    Ok(true)
}
