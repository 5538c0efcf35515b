//! Channel-keyed event bus backed by `tokio::sync::broadcast` channels.
//!
//! [`Notifier`] is the publish/subscribe hub for [`JobEvent`]s. Channels
//! are keyed by name — one per job id and one per owner id — so a client
//! may follow a single job or all of its own jobs. Designed to be shared
//! via `Arc<Notifier>`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use atelier_core::channels::{job_channel, owner_channel};
use atelier_core::job::JobStatus;
use atelier_core::job_events;
use atelier_core::outcome::JobOutcome;
use atelier_core::types::{JobId, OwnerId};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle event pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// One of the `atelier_core::job_events` constants.
    pub event_type: String,
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(event_type: &str, job_id: JobId, owner_id: &str, status: JobStatus) -> Self {
        Self {
            event_type: event_type.to_string(),
            job_id,
            owner_id: owner_id.to_string(),
            status: status.name().to_string(),
            progress: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Job created and enqueued.
    pub fn queued(job_id: JobId, owner_id: &str) -> Self {
        Self::new(job_events::EVENT_JOB_QUEUED, job_id, owner_id, JobStatus::Pending)
    }

    /// A worker started an attempt.
    pub fn processing(job_id: JobId, owner_id: &str) -> Self {
        Self::new(
            job_events::EVENT_JOB_PROCESSING,
            job_id,
            owner_id,
            JobStatus::Processing,
        )
    }

    /// Progress update while processing.
    pub fn progress(job_id: JobId, owner_id: &str, pct: i16) -> Self {
        let mut event = Self::new(
            job_events::EVENT_JOB_PROGRESS,
            job_id,
            owner_id,
            JobStatus::Processing,
        );
        event.progress = Some(pct);
        event
    }

    /// Terminal event for the given outcome. Always the last event a job emits.
    pub fn terminal(job_id: JobId, owner_id: &str, outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded { result } => {
                let mut event = Self::new(
                    job_events::EVENT_JOB_SUCCEEDED,
                    job_id,
                    owner_id,
                    JobStatus::Succeeded,
                );
                event.progress = Some(100);
                event.result = Some(result.clone());
                event
            }
            JobOutcome::Failed { message, .. } => {
                let mut event = Self::new(
                    job_events::EVENT_JOB_FAILED,
                    job_id,
                    owner_id,
                    JobStatus::Failed,
                );
                event.error = Some(message.clone());
                event
            }
            JobOutcome::Cancelled => Self::new(
                job_events::EVENT_JOB_CANCELLED,
                job_id,
                owner_id,
                JobStatus::Cancelled,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Buffer capacity of each per-channel broadcast sender.
const CHANNEL_CAPACITY: usize = 256;

/// Channel-keyed fan-out hub.
///
/// Senders are created lazily on first subscribe or publish and pruned
/// once the last receiver goes away. Delivery is at-least-once for live
/// subscribers; a slow receiver observes `RecvError::Lagged` and should
/// re-read the job store to catch up.
pub struct Notifier {
    channels: RwLock<HashMap<String, broadcast::Sender<JobEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an event to a single named channel.
    ///
    /// Events published to a channel nobody subscribes to are dropped.
    pub async fn publish(&self, channel: &str, event: JobEvent) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(channel) {
            if sender.receiver_count() == 0 {
                channels.remove(channel);
            } else {
                // SendError only means every receiver disconnected between
                // the count check and the send.
                let _ = sender.send(event);
            }
        }
    }

    /// Publish a job event to both its job channel and its owner channel.
    pub async fn publish_job_event(&self, event: JobEvent) {
        let job_ch = job_channel(event.job_id);
        let owner_ch = owner_channel(&event.owner_id);
        self.publish(&job_ch, event.clone()).await;
        self.publish(&owner_ch, event).await;
    }

    /// Subscribe to a named channel, creating it if needed.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live channels (for introspection and tests).
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
