//! Execution of a single leased job: start the provider request, poll it
//! to completion, store the artifact, and settle the final state.

use tokio::time::Instant;

use atelier_core::config::PipelineConfig;
use atelier_core::outcome::{FailureKind, JobOutcome};
use atelier_core::types::JobId;
use atelier_db::models::job::Job;
use atelier_db::store::StoreError;
use atelier_events::JobEvent;
use atelier_provider::{Artifact, PollOutcome, ProviderRef};
use atelier_storage::{retry::store_with_retry, ArtifactMeta};

use crate::finalize::finalize_job;
use crate::PipelineDeps;

/// Consecutive poll transport errors tolerated before the attempt is
/// treated as a transient failure.
const POLL_ERROR_LIMIT: u32 = 5;

/// Drive one leased job to a settled state (terminal, requeued, or
/// abandoned because the lease was lost).
///
/// The caller has already won the lease for `job_id`.
pub(crate) async fn process(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    worker_id: &str,
    job_id: JobId,
) -> Result<(), StoreError> {
    let Some(job) = deps.store.get(job_id).await? else {
        tracing::warn!(job_id = %job_id, "Dequeued job no longer exists");
        return Ok(());
    };
    if job.is_terminal() {
        return Ok(());
    }

    // Cancellation requested before any work started: no provider call,
    // no attempt consumed.
    if job.cancel_requested {
        finalize_job(deps, job_id, &JobOutcome::Cancelled).await?;
        return Ok(());
    }

    // A reclaimed job arrives here with its previous attempts intact. If
    // the budget is already spent, settle it instead of starting an
    // attempt beyond the cap.
    if job.attempts >= config.max_attempts {
        finalize_job(
            deps,
            job_id,
            &JobOutcome::Failed {
                message: format!("retries exhausted after {} attempts", job.attempts),
                kind: FailureKind::Transient,
            },
        )
        .await?;
        deps.queue
            .dead_letter(job_id)
            .await
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        return Ok(());
    }

    let attempts = match deps.store.begin_attempt(job_id, worker_id).await {
        Ok(n) => n,
        Err(StoreError::Conflict(_)) => {
            // Lease was taken over between dequeue and here; let the new
            // holder run it.
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    tracing::info!(
        job_id = %job_id,
        worker_id,
        attempt = attempts,
        "Processing job",
    );
    deps.notifier
        .publish_job_event(JobEvent::processing(job_id, &job.owner_id))
        .await;

    // A crash-recovered job may already have a live provider request;
    // resume polling it instead of starting a duplicate.
    let provider_ref = match &job.provider_ref {
        Some(existing) => ProviderRef(existing.clone()),
        None => match deps.provider.start(&job.request).await {
            Ok(provider_ref) => {
                deps.store
                    .set_provider_ref(job_id, &provider_ref.0)
                    .await?;
                provider_ref
            }
            Err(e) => {
                settle_failure(deps, config, &job, attempts, e.kind, e.message).await?;
                return Ok(());
            }
        },
    };

    poll_to_completion(deps, config, worker_id, &job, attempts, &provider_ref).await
}

/// Poll the provider until the job settles or the attempt deadline passes.
async fn poll_to_completion(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    worker_id: &str,
    job: &Job,
    attempts: i32,
    provider_ref: &ProviderRef,
) -> Result<(), StoreError> {
    let job_id = job.id;
    let deadline = Instant::now() + config.max_processing_duration;
    let mut ticker = tokio::time::interval(config.poll_interval);
    let mut poll_errors: u32 = 0;

    loop {
        ticker.tick().await;

        if Instant::now() >= deadline {
            tracing::warn!(job_id = %job_id, "Attempt exceeded max processing duration");
            let _ = deps.provider.cancel(provider_ref).await;
            settle_failure(
                deps,
                config,
                job,
                attempts,
                FailureKind::Transient,
                format!(
                    "generation did not complete within {}s",
                    config.max_processing_duration.as_secs()
                ),
            )
            .await?;
            return Ok(());
        }

        // Renewing the lease each tick keeps the job ours; losing it means
        // the reaper reclaimed the job and someone else may be running it.
        if !deps
            .store
            .extend_lease(job_id, worker_id, config.lease_duration)
            .await?
        {
            tracing::warn!(job_id = %job_id, worker_id, "Lost lease; abandoning attempt");
            return Ok(());
        }

        // Re-read for the cancellation flag and for a callback that may
        // have finalized the job while we were polling.
        let Some(current) = deps.store.get(job_id).await? else {
            return Ok(());
        };
        if current.is_terminal() {
            return Ok(());
        }
        if current.cancel_requested {
            let _ = deps.provider.cancel(provider_ref).await;
            finalize_job(deps, job_id, &JobOutcome::Cancelled).await?;
            return Ok(());
        }

        match deps.provider.poll(provider_ref).await {
            Ok(PollOutcome::Pending) => {}
            Ok(PollOutcome::Progress(pct)) => {
                deps.store.update_progress(job_id, pct).await?;
                deps.notifier
                    .publish_job_event(JobEvent::progress(job_id, &current.owner_id, pct))
                    .await;
            }
            Ok(PollOutcome::Succeeded(artifact)) => {
                complete_succeeded(deps, config, &current, &artifact).await?;
                return Ok(());
            }
            Ok(PollOutcome::Failed { message, kind }) => {
                settle_failure(deps, config, job, attempts, kind, message).await?;
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                poll_errors += 1;
                tracing::warn!(
                    job_id = %job_id,
                    errors = poll_errors,
                    error = %e,
                    "Provider poll failed",
                );
                if poll_errors >= POLL_ERROR_LIMIT {
                    settle_failure(deps, config, job, attempts, e.kind, e.message).await?;
                    return Ok(());
                }
            }
            Err(e) => {
                settle_failure(deps, config, job, attempts, e.kind, e.message).await?;
                return Ok(());
            }
        }
    }
}

/// Store the artifact and finalize as succeeded.
///
/// Re-checks the current status before uploading so a job finalized by the
/// callback path never produces a second upload. Storage retries come out
/// of their own budget; exhausting it is a permanent job failure.
pub(crate) async fn complete_succeeded(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    job: &Job,
    artifact: &Artifact,
) -> Result<(), StoreError> {
    if job.is_terminal() {
        return Ok(());
    }

    let meta = ArtifactMeta {
        job_id: job.id,
        content_type: artifact.content_type.clone(),
    };
    match store_with_retry(
        deps.artifacts.as_ref(),
        &artifact.bytes,
        &meta,
        config.storage_retry_budget,
    )
    .await
    {
        Ok(reference) => {
            finalize_job(deps, job.id, &JobOutcome::Succeeded { result: reference }).await?;
        }
        Err(e) => {
            finalize_job(
                deps,
                job.id,
                &JobOutcome::Failed {
                    message: format!("artifact upload failed after retries: {e}"),
                    kind: FailureKind::Permanent,
                },
            )
            .await?;
            deps.queue
                .dead_letter(job.id)
                .await
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
        }
    }
    Ok(())
}

/// Settle a failed attempt: requeue with backoff when the failure is
/// transient and attempts remain, otherwise finalize and dead-letter.
async fn settle_failure(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    job: &Job,
    attempts: i32,
    kind: FailureKind,
    message: String,
) -> Result<(), StoreError> {
    if kind.is_transient() && attempts < config.max_attempts {
        tracing::info!(
            job_id = %job.id,
            attempt = attempts,
            max_attempts = config.max_attempts,
            error = %message,
            "Transient failure; scheduling retry",
        );
        if deps.store.release_to_pending(job.id).await? {
            deps.queue
                .requeue_with_backoff(job.id, attempts as u32)
                .await
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
        }
        return Ok(());
    }

    let message = if kind.is_transient() {
        format!("retries exhausted after {attempts} attempts: {message}")
    } else {
        message
    };
    finalize_job(deps, job.id, &JobOutcome::Failed { message, kind }).await?;
    deps.queue
        .dead_letter(job.id)
        .await
        .map_err(|e| StoreError::Conflict(e.to_string()))?;
    Ok(())
}
