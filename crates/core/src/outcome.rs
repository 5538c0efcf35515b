//! Terminal job outcomes and the failure taxonomy.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// Whether a failure may be retried.
///
/// Transient failures (network timeouts, 5xx-equivalents, rate limits) are
/// retried with backoff until the attempt budget is exhausted. Permanent
/// failures (invalid request, content rejected) fail the job immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Name stored in the job record's `error_kind` column.
    pub fn name(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// The authoritative terminal outcome of a job.
///
/// Written exactly once to the job store via `finalize`; both the worker
/// poll loop and the inbound provider callback converge on this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The artifact was produced and stored; carries the storage reference.
    Succeeded { result: String },
    /// All retries exhausted or a permanent error occurred.
    Failed {
        message: String,
        kind: FailureKind,
    },
    /// User-initiated cancellation. Terminal, but not an error.
    Cancelled,
}

impl JobOutcome {
    /// The terminal status this outcome maps to.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded { .. } => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(
            JobOutcome::Succeeded {
                result: "s3://b/k".into()
            }
            .status(),
            JobStatus::Succeeded
        );
        assert_eq!(
            JobOutcome::Failed {
                message: "boom".into(),
                kind: FailureKind::Permanent
            }
            .status(),
            JobStatus::Failed
        );
        assert_eq!(JobOutcome::Cancelled.status(), JobStatus::Cancelled);
        assert!(JobOutcome::Cancelled.status().is_terminal());
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::Transient).unwrap();
        assert_eq!(json, "\"transient\"");
    }
}
