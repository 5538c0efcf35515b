//! Bounded retry for artifact uploads.
//!
//! Storage failures are transient up to a small local budget that is
//! separate from the job's attempt counter: a flaky upload should not burn
//! a whole generation attempt. Exhausting the budget escalates to a
//! permanent job failure at the call site.

use std::time::Duration;

use crate::{ArtifactMeta, ArtifactStore, StorageError};

/// Delay between upload retries.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Attempt `store` up to `budget` times, sleeping briefly between tries.
///
/// `budget` counts total attempts, so a budget of 3 allows two retries.
pub async fn store_with_retry(
    store: &dyn ArtifactStore,
    bytes: &[u8],
    meta: &ArtifactMeta,
    budget: u32,
) -> Result<String, StorageError> {
    let budget = budget.max(1);
    let mut last_err = None;

    for attempt in 1..=budget {
        match store.store(bytes, meta).await {
            Ok(reference) => return Ok(reference),
            Err(e) => {
                tracing::warn!(
                    job_id = %meta.job_id,
                    attempt,
                    budget,
                    error = %e,
                    "Artifact upload failed",
                );
                last_err = Some(e);
                if attempt < budget {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    // budget >= 1, so last_err is always set here.
    Err(last_err.unwrap_or_else(|| StorageError::Upload("no attempts made".into())))
}
