//! In-memory [`WorkQueue`] with delayed delivery.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use atelier_core::backoff::BackoffPolicy;
use atelier_core::types::{JobId, Timestamp};

use crate::{QueueError, WorkQueue};

struct QueueState {
    /// Ordered by `(not_before, job_id)`; the head is the next candidate.
    entries: BTreeSet<(Timestamp, JobId)>,
    dead: HashSet<JobId>,
}

/// Mutex-guarded delay queue. Workers poll `dequeue` with an idle sleep;
/// no wakeup machinery is needed at this scale.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    backoff: BackoffPolicy,
}

impl MemoryQueue {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BTreeSet::new(),
                dead: HashSet::new(),
            }),
            backoff,
        }
    }

    /// Number of queued (not yet delivered) entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(
        &self,
        job_id: JobId,
        not_before: Option<Timestamp>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.dead.contains(&job_id) {
            tracing::warn!(job_id = %job_id, "Refusing to enqueue dead-lettered job");
            return Ok(());
        }
        state
            .entries
            .insert((not_before.unwrap_or_else(Utc::now), job_id));
        Ok(())
    }

    async fn dequeue(&self, _worker_id: &str) -> Result<Option<JobId>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let ready = state
            .entries
            .iter()
            .next()
            .filter(|(not_before, _)| *not_before <= now)
            .copied();

        if let Some(entry) = ready {
            state.entries.remove(&entry);
            return Ok(Some(entry.1));
        }
        Ok(None)
    }

    async fn requeue_with_backoff(&self, job_id: JobId, attempt: u32) -> Result<(), QueueError> {
        let delay = self.backoff.delay_for_attempt(attempt);
        let not_before = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        tracing::debug!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Requeueing with backoff",
        );
        self.enqueue(job_id, Some(not_before)).await
    }

    async fn dead_letter(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.dead.insert(job_id);
        state.entries.retain(|(_, id)| *id != job_id);
        Ok(())
    }

    async fn dead_letter_ids(&self) -> Result<Vec<JobId>, QueueError> {
        Ok(self.state.lock().await.dead.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryQueue {
        MemoryQueue::new(BackoffPolicy::new(
            Duration::from_millis(50),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn fifo_by_readiness() {
        let q = queue();
        let a = uuid::Uuid::now_v7();
        let b = uuid::Uuid::now_v7();
        q.enqueue(a, None).await.unwrap();
        q.enqueue(b, None).await.unwrap();

        assert_eq!(q.dequeue("w1").await.unwrap(), Some(a));
        assert_eq!(q.dequeue("w1").await.unwrap(), Some(b));
        assert_eq!(q.dequeue("w1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delayed_entry_not_delivered_early() {
        let q = queue();
        let id = uuid::Uuid::now_v7();
        q.enqueue(id, Some(Utc::now() + chrono::Duration::milliseconds(80)))
            .await
            .unwrap();

        assert_eq!(q.dequeue("w1").await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(q.dequeue("w1").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn requeue_applies_backoff_delay() {
        let q = queue();
        let id = uuid::Uuid::now_v7();
        q.requeue_with_backoff(id, 1).await.unwrap();

        // Delay for attempt 1 is ~50ms (+/- jitter); not ready immediately.
        assert_eq!(q.dequeue("w1").await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(q.dequeue("w1").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn dead_lettered_job_never_redelivered() {
        let q = queue();
        let id = uuid::Uuid::now_v7();
        q.enqueue(id, None).await.unwrap();
        q.dead_letter(id).await.unwrap();

        assert_eq!(q.dequeue("w1").await.unwrap(), None);

        // Even an explicit re-enqueue is refused.
        q.enqueue(id, None).await.unwrap();
        assert_eq!(q.dequeue("w1").await.unwrap(), None);
        assert_eq!(q.dead_letter_ids().await.unwrap(), vec![id]);
    }
}
