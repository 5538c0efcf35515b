//! Inbound provider completion callbacks.
//!
//! Some providers push a completion notification instead of (or in addition
//! to) being polled. The callback is mapped to the job via `provider_ref`
//! and funneled into the same [`finalize_job`] path the poll loop uses, so
//! a callback arriving after the poll loop already settled the job is a
//! harmless no-op.

use serde::Deserialize;

use atelier_core::config::PipelineConfig;
use atelier_core::outcome::{FailureKind, JobOutcome};
use atelier_db::store::StoreError;
use atelier_provider::{PollOutcome, ProviderRef};

use crate::finalize::finalize_job;
use crate::{runner, PipelineDeps};

/// Payload of `POST /api/v1/callbacks/provider`. Origin validation happens
/// upstream of this pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCallback {
    pub provider_ref: String,
    pub outcome: CallbackOutcome,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Succeeded,
    Failed {
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

/// Result of handling a callback, for the ingress layer to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// The callback performed the terminal transition.
    Applied,
    /// The job was already settled (duplicate delivery) or the failure is
    /// retryable and the poll loop owns the retry.
    Ignored,
    /// No job matches the given `provider_ref`.
    UnknownRef,
}

/// Apply an inbound completion callback.
///
/// A `Succeeded` callback carries no artifact, so the provider is queried
/// once for the result before the job is completed. Retryable failures are
/// left to the worker's own retry machinery; only permanent failures are
/// finalized here.
pub async fn handle_provider_callback(
    deps: &PipelineDeps,
    config: &PipelineConfig,
    callback: &ProviderCallback,
) -> Result<CallbackDisposition, StoreError> {
    let Some(job) = deps
        .store
        .find_by_provider_ref(&callback.provider_ref)
        .await?
    else {
        tracing::warn!(
            provider_ref = %callback.provider_ref,
            "Callback for unknown provider reference",
        );
        return Ok(CallbackDisposition::UnknownRef);
    };

    if job.is_terminal() {
        tracing::debug!(job_id = %job.id, "Callback for already-finalized job; ignoring");
        return Ok(CallbackDisposition::Ignored);
    }

    match &callback.outcome {
        CallbackOutcome::Succeeded => {
            let provider_ref = ProviderRef(callback.provider_ref.clone());
            match deps.provider.poll(&provider_ref).await {
                Ok(PollOutcome::Succeeded(artifact)) => {
                    runner::complete_succeeded(deps, config, &job, &artifact).await?;
                    Ok(CallbackDisposition::Applied)
                }
                Ok(other) => {
                    // Provider says succeeded but its status endpoint
                    // disagrees; let the poll loop settle it.
                    tracing::warn!(
                        job_id = %job.id,
                        state = ?other,
                        "Success callback but provider not ready; deferring to poll loop",
                    );
                    Ok(CallbackDisposition::Ignored)
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Artifact fetch for callback failed");
                    Ok(CallbackDisposition::Ignored)
                }
            }
        }
        CallbackOutcome::Failed { message, retryable } => {
            if *retryable {
                // The worker holding the lease will observe the failure on
                // its next poll and apply the backoff policy.
                return Ok(CallbackDisposition::Ignored);
            }
            let applied = finalize_job(
                deps,
                job.id,
                &JobOutcome::Failed {
                    message: message.clone(),
                    kind: FailureKind::Permanent,
                },
            )
            .await?;
            if applied {
                deps.queue
                    .dead_letter(job.id)
                    .await
                    .map_err(|e| StoreError::Conflict(e.to_string()))?;
                Ok(CallbackDisposition::Applied)
            } else {
                Ok(CallbackDisposition::Ignored)
            }
        }
    }
}
