//! Event type constants for job lifecycle notifications.
//!
//! Used by the worker and the API when broadcasting job updates to
//! subscribed clients.

/// Job record created and enqueued.
pub const EVENT_JOB_QUEUED: &str = "job_queued";

/// A worker leased the job and started an attempt.
pub const EVENT_JOB_PROCESSING: &str = "job_processing";

/// Progress update during generation (percentage).
pub const EVENT_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully; the event carries the storage reference.
pub const EVENT_JOB_SUCCEEDED: &str = "job_succeeded";

/// Job failed permanently (retries exhausted or permanent error).
pub const EVENT_JOB_FAILED: &str = "job_failed";

/// Job was cancelled at the user's request.
pub const EVENT_JOB_CANCELLED: &str = "job_cancelled";
