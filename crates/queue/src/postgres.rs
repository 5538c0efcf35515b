//! Postgres-backed [`WorkQueue`].
//!
//! Dequeue uses `FOR UPDATE SKIP LOCKED` so multiple worker processes can
//! pull from the same queue without double-dispatch.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use atelier_core::backoff::BackoffPolicy;
use atelier_core::types::{JobId, Timestamp};

use crate::{QueueError, WorkQueue};

pub struct PgQueue {
    pool: PgPool,
    backoff: BackoffPolicy,
}

impl PgQueue {
    pub fn new(pool: PgPool, backoff: BackoffPolicy) -> Self {
        Self { pool, backoff }
    }
}

#[async_trait]
impl WorkQueue for PgQueue {
    async fn enqueue(
        &self,
        job_id: JobId,
        not_before: Option<Timestamp>,
    ) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO job_queue (job_id, not_before) \
             SELECT $1, $2 \
             WHERE NOT EXISTS (SELECT 1 FROM job_dead_letters WHERE job_id = $1)",
        )
        .bind(job_id)
        .bind(not_before.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, _worker_id: &str) -> Result<Option<JobId>, QueueError> {
        let job_id: Option<JobId> = sqlx::query_scalar(
            "DELETE FROM job_queue \
             WHERE id = ( \
                 SELECT id FROM job_queue \
                 WHERE not_before <= NOW() \
                 ORDER BY not_before ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING job_id",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(job_id)
    }

    async fn requeue_with_backoff(&self, job_id: JobId, attempt: u32) -> Result<(), QueueError> {
        let delay = self.backoff.delay_for_attempt(attempt);
        let not_before =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        tracing::debug!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Requeueing with backoff",
        );
        self.enqueue(job_id, Some(not_before)).await
    }

    async fn dead_letter(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO job_dead_letters (job_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM job_queue WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter_ids(&self) -> Result<Vec<JobId>, QueueError> {
        let ids = sqlx::query_scalar(
            "SELECT job_id FROM job_dead_letters ORDER BY dead_lettered_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
