//! In-memory [`JobStore`] with the same compare-and-set semantics as the
//! Postgres implementation.
//!
//! Backs the hermetic test suites and the `STORE=memory` development mode.
//! A single mutex guards the map; every operation is therefore atomic with
//! respect to concurrent lease attempts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use atelier_core::job::JobStatus;
use atelier_core::outcome::JobOutcome;
use atelier_core::types::{JobId, Timestamp};

use crate::models::job::{CreateJob, Job};
use crate::store::{JobStore, StoreError};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the job currently holds a valid (non-expired) lease.
    fn lease_is_valid(job: &Job, now: Timestamp) -> bool {
        matches!(job.status(), JobStatus::Leased | JobStatus::Processing)
            && job.lease_expires_at.is_some_and(|exp| exp > now)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError> {
        let job = Job {
            id: uuid::Uuid::now_v7(),
            owner_id: input.owner_id,
            request: input.request,
            status_id: JobStatus::Pending.id(),
            attempts: 0,
            provider_ref: None,
            progress: 0,
            result: None,
            error: None,
            error_kind: None,
            cancel_requested: false,
            lease_holder: None,
            lease_expires_at: None,
            created_at: Utc::now(),
            leased_at: None,
            completed_at: None,
        };
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|j| j.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn try_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let claimable = job.status() == JobStatus::Pending
            || (!job.is_terminal() && !Self::lease_is_valid(job, now));
        if !claimable {
            return Ok(false);
        }

        job.status_id = JobStatus::Leased.id();
        job.lease_holder = Some(holder.to_string());
        job.leased_at = Some(now);
        job.lease_expires_at = Some(now + lease_duration);
        Ok(true)
    }

    async fn extend_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.is_terminal() || job.lease_holder.as_deref() != Some(holder) {
            return Ok(false);
        }
        job.lease_expires_at = Some(Utc::now() + lease_duration);
        Ok(true)
    }

    async fn begin_attempt(&self, id: JobId, holder: &str) -> Result<i32, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status() != JobStatus::Leased || job.lease_holder.as_deref() != Some(holder) {
            return Err(StoreError::Conflict(format!(
                "job {id} is not leased by {holder}"
            )));
        }
        job.status_id = JobStatus::Processing.id();
        job.attempts += 1;
        Ok(job.attempts)
    }

    async fn set_provider_ref(&self, id: JobId, provider_ref: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.provider_ref = Some(provider_ref.to_string());
        Ok(())
    }

    async fn update_progress(&self, id: JobId, pct: i16) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Monotone while processing; stale or out-of-order updates are ignored.
        let pct = pct.clamp(0, 100);
        if job.status() == JobStatus::Processing && pct > job.progress {
            job.progress = pct;
        }
        Ok(())
    }

    async fn finalize(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.is_terminal() {
            return Ok(false);
        }

        job.status_id = outcome.status().id();
        job.completed_at = Some(Utc::now());
        job.lease_holder = None;
        job.lease_expires_at = None;
        match outcome {
            JobOutcome::Succeeded { result } => {
                job.result = Some(result.clone());
                job.progress = 100;
            }
            JobOutcome::Failed { message, kind } => {
                job.error = Some(message.clone());
                job.error_kind = Some(kind.name().to_string());
            }
            JobOutcome::Cancelled => {}
        }
        Ok(true)
    }

    async fn request_cancel(&self, id: JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.is_terminal() {
            return Ok(false);
        }
        job.cancel_requested = true;
        Ok(true)
    }

    async fn release_to_pending(&self, id: JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.is_terminal() {
            return Ok(false);
        }
        job.status_id = JobStatus::Pending.id();
        job.lease_holder = None;
        job.lease_expires_at = None;
        job.progress = 0;
        Ok(true)
    }

    async fn reclaim_expired(&self, now: Timestamp) -> Result<Vec<JobId>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            let expired = matches!(job.status(), JobStatus::Leased | JobStatus::Processing)
                && job.lease_expires_at.is_some_and(|exp| exp <= now);
            if expired {
                job.status_id = JobStatus::Pending.id();
                job.lease_holder = None;
                job.lease_expires_at = None;
                job.progress = 0;
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }
}
