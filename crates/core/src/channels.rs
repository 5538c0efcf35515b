//! Well-known notification channel names.
//!
//! Every job event is published to two channels: one keyed by job id
//! ("this one job") and one keyed by owner id ("all my jobs").

use crate::types::JobId;

/// Channel carrying events for a single job.
pub fn job_channel(job_id: JobId) -> String {
    format!("job:{job_id}")
}

/// Channel carrying events for every job owned by one caller.
pub fn owner_channel(owner_id: &str) -> String {
    format!("owner:{owner_id}")
}
