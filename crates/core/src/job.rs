//! Job lifecycle status and the transition state machine.
//!
//! Statuses are persisted as SMALLINT ids (1-based). The state machine is
//! the single definition of which transitions are legal; the stores enforce
//! it structurally through their compare-and-set guards.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Job execution status.
///
/// Lifecycle: `Pending -> Leased -> Processing -> {Succeeded | Failed |
/// Cancelled}`. Terminal states never transition again. A lease that
/// expires without completion drops the job back to `Pending` (crash
/// recovery), and a cancel request observed before the first lease moves
/// `Pending` straight to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum JobStatus {
    Pending = 1,
    Leased = 2,
    Processing = 3,
    Succeeded = 4,
    Failed = 5,
    Cancelled = 6,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Parse a database status ID.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Leased),
            3 => Some(Self::Processing),
            4 => Some(Self::Succeeded),
            5 => Some(Self::Failed),
            6 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name as used in API payloads and events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

pub mod state_machine {
    use super::JobStatus;

    /// Returns the set of valid target statuses reachable from `from`.
    ///
    /// Terminal states return an empty slice. `Leased`/`Processing` back to
    /// `Pending` models lease-expiry reclaim, not a user-visible regression:
    /// the reclaimed job is simply eligible for another lease.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        use JobStatus::*;
        match from {
            Pending => &[Leased, Cancelled],
            Leased => &[Processing, Cancelled, Pending],
            Processing => &[Succeeded, Failed, Cancelled, Pending],
            Succeeded | Failed | Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning a descriptive error for invalid ones.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} -> {}",
                from.name(),
                to.name()
            ))
        }
    }
}
