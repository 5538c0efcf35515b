//! Job entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use atelier_core::job::{JobStatus, StatusId};
use atelier_core::types::{JobId, OwnerId, Timestamp};

/// A row from the `jobs` table.
///
/// The `request` payload is opaque to the pipeline — it is handed to the
/// generation provider verbatim and never inspected.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub request: serde_json::Value,
    pub status_id: StatusId,
    pub attempts: i32,
    /// Provider-side identifier for the in-flight request; set once a
    /// generation request has been created, used to correlate callbacks.
    pub provider_ref: Option<String>,
    /// Last known progress percentage, 0..=100, monotone while processing.
    pub progress: i16,
    /// Storage reference; set if and only if the job succeeded.
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    /// Cooperative cancellation flag checked by the worker each poll tick.
    pub cancel_requested: bool,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub leased_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Decoded status. Falls back to `Failed` for an unknown id, which can
    /// only happen if the table contains values outside the seed data.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Input for creating a new job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub owner_id: OwnerId,
    pub request: serde_json::Value,
}

/// Public projection of a job returned by the API and carried in events.
#[derive(Debug, Clone, Serialize)]
pub struct JobProjection {
    pub id: JobId,
    pub status: &'static str,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl From<&Job> for JobProjection {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status().name(),
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            attempts: job.attempts,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}
