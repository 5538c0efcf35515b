//! Postgres-backed [`JobStore`].
//!
//! Every mutation is a single UPDATE with its precondition in the WHERE
//! clause, so lease claims and finalization are atomic compare-and-sets
//! without explicit locking.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use atelier_core::job::JobStatus;
use atelier_core::outcome::JobOutcome;
use atelier_core::types::{JobId, Timestamp};

use crate::models::job::{CreateJob, Job};
use crate::store::{JobStore, StoreError};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, request, status_id, attempts, provider_ref, progress, \
    result, error, error_kind, cancel_requested, lease_holder, \
    lease_expires_at, created_at, leased_at, completed_at";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: CreateJob) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO jobs (id, owner_id, request, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(uuid::Uuid::now_v7())
            .bind(&input.owner_id)
            .bind(&input.request)
            .bind(JobStatus::Pending.id())
            .fetch_one(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE provider_ref = $1");
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(provider_ref)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_by_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        Ok(sqlx::query_as::<_, Job>(&query)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn try_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        // Claimable: Pending, or an expired lease (crash recovery).
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, lease_holder = $3, leased_at = NOW(), \
                 lease_expires_at = NOW() + ($4 * INTERVAL '1 millisecond') \
             WHERE id = $1 \
               AND (status_id = $5 \
                    OR (status_id IN ($2, $6) AND lease_expires_at <= NOW()))",
        )
        .bind(id)
        .bind(JobStatus::Leased.id())
        .bind(holder)
        .bind(lease_duration.as_millis() as i64)
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Processing.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend_lease(
        &self,
        id: JobId,
        holder: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET lease_expires_at = NOW() + ($3 * INTERVAL '1 millisecond') \
             WHERE id = $1 AND lease_holder = $2 AND status_id IN ($4, $5)",
        )
        .bind(id)
        .bind(holder)
        .bind(lease_duration.as_millis() as i64)
        .bind(JobStatus::Leased.id())
        .bind(JobStatus::Processing.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin_attempt(&self, id: JobId, holder: &str) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = $3, attempts = attempts + 1 \
             WHERE id = $1 AND lease_holder = $2 AND status_id = $4 \
             RETURNING attempts",
        )
        .bind(id)
        .bind(holder)
        .bind(JobStatus::Processing.id())
        .bind(JobStatus::Leased.id())
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| {
            StoreError::Conflict(format!("job {id} is not leased by {holder}"))
        })
    }

    async fn set_provider_ref(&self, id: JobId, provider_ref: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET provider_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(provider_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_progress(&self, id: JobId, pct: i16) -> Result<(), StoreError> {
        // The `progress < $2` guard keeps the value monotone even when
        // updates arrive out of order.
        sqlx::query(
            "UPDATE jobs SET progress = $2 \
             WHERE id = $1 AND status_id = $3 AND progress < $2",
        )
        .bind(id)
        .bind(pct.clamp(0, 100))
        .bind(JobStatus::Processing.id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        let terminal_guard = "status_id NOT IN ($3, $4, $5)";
        let result = match outcome {
            JobOutcome::Succeeded { result } => {
                let query = format!(
                    "UPDATE jobs \
                     SET status_id = $2, result = $6, progress = 100, \
                         completed_at = NOW(), lease_holder = NULL, \
                         lease_expires_at = NULL \
                     WHERE id = $1 AND {terminal_guard}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(JobStatus::Succeeded.id())
                    .bind(JobStatus::Succeeded.id())
                    .bind(JobStatus::Failed.id())
                    .bind(JobStatus::Cancelled.id())
                    .bind(result)
                    .execute(&self.pool)
                    .await?
            }
            JobOutcome::Failed { message, kind } => {
                let query = format!(
                    "UPDATE jobs \
                     SET status_id = $2, error = $6, error_kind = $7, \
                         completed_at = NOW(), lease_holder = NULL, \
                         lease_expires_at = NULL \
                     WHERE id = $1 AND {terminal_guard}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(JobStatus::Failed.id())
                    .bind(JobStatus::Succeeded.id())
                    .bind(JobStatus::Failed.id())
                    .bind(JobStatus::Cancelled.id())
                    .bind(message)
                    .bind(kind.name())
                    .execute(&self.pool)
                    .await?
            }
            JobOutcome::Cancelled => {
                let query = format!(
                    "UPDATE jobs \
                     SET status_id = $2, completed_at = NOW(), \
                         lease_holder = NULL, lease_expires_at = NULL \
                     WHERE id = $1 AND {terminal_guard}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(JobStatus::Cancelled.id())
                    .bind(JobStatus::Succeeded.id())
                    .bind(JobStatus::Failed.id())
                    .bind(JobStatus::Cancelled.id())
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn request_cancel(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET cancel_requested = TRUE \
             WHERE id = $1 AND status_id NOT IN ($2, $3, $4)",
        )
        .bind(id)
        .bind(JobStatus::Succeeded.id())
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Cancelled.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_to_pending(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, lease_holder = NULL, lease_expires_at = NULL, \
                 progress = 0 \
             WHERE id = $1 AND status_id NOT IN ($3, $4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Succeeded.id())
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Cancelled.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_expired(&self, now: Timestamp) -> Result<Vec<JobId>, StoreError> {
        let ids: Vec<JobId> = sqlx::query_scalar(
            "UPDATE jobs \
             SET status_id = $1, lease_holder = NULL, lease_expires_at = NULL, \
                 progress = 0 \
             WHERE status_id IN ($2, $3) AND lease_expires_at <= $4 \
             RETURNING id",
        )
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::Leased.id())
        .bind(JobStatus::Processing.id())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if !ids.is_empty() {
            tracing::warn!(count = ids.len(), "Reclaimed jobs with expired leases");
        }
        Ok(ids)
    }
}
