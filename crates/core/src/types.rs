/// Jobs are identified by UUID v7 (time-ordered, assigned at creation).
pub type JobId = uuid::Uuid;

/// Opaque caller identity. Authentication happens upstream; the pipeline
/// only trusts and records the id it is handed.
pub type OwnerId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
