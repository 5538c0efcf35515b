//! End-to-end pipeline tests over the in-memory seams.
//!
//! A scripted provider stub stands in for the external generation service;
//! everything else is the real pipeline wiring. No network, no database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use atelier_core::channels::job_channel;
use atelier_core::config::PipelineConfig;
use atelier_core::job::JobStatus;
use atelier_core::job_events;
use atelier_core::outcome::FailureKind;
use atelier_db::memory::MemoryJobStore;
use atelier_db::models::job::{CreateJob, Job};
use atelier_db::store::JobStore;
use atelier_events::{JobEvent, Notifier};
use atelier_provider::{
    Artifact, GenerationProvider, PollOutcome, ProviderError, ProviderRef,
};
use atelier_queue::memory::MemoryQueue;
use atelier_queue::WorkQueue;
use atelier_storage::memory::MemoryArtifactStore;
use atelier_worker::callback::{
    handle_provider_callback, CallbackDisposition, CallbackOutcome, ProviderCallback,
};
use atelier_worker::pool::WorkerPool;
use atelier_worker::reaper::LeaseReaper;
use atelier_worker::PipelineDeps;

// ---------------------------------------------------------------------------
// Scripted provider stub
// ---------------------------------------------------------------------------

/// Provider whose behavior is scripted per test.
///
/// `start` fails with the queued errors first, then succeeds with sequential
/// references. `poll` consumes the script, then repeats the fallback.
struct StubProvider {
    start_errors: Mutex<VecDeque<ProviderError>>,
    start_times: Mutex<Vec<Instant>>,
    poll_script: Mutex<VecDeque<PollOutcome>>,
    poll_fallback: Mutex<PollOutcome>,
    cancels: AtomicUsize,
}

impl StubProvider {
    fn new() -> Self {
        Self {
            start_errors: Mutex::new(VecDeque::new()),
            start_times: Mutex::new(Vec::new()),
            poll_script: Mutex::new(VecDeque::new()),
            poll_fallback: Mutex::new(PollOutcome::Pending),
            cancels: AtomicUsize::new(0),
        }
    }

    fn fail_starts(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.start_errors.lock().unwrap().extend(errors);
    }

    fn script_polls(&self, outcomes: impl IntoIterator<Item = PollOutcome>) {
        self.poll_script.lock().unwrap().extend(outcomes);
    }

    fn set_poll_fallback(&self, outcome: PollOutcome) {
        *self.poll_fallback.lock().unwrap() = outcome;
    }

    fn start_times(&self) -> Vec<Instant> {
        self.start_times.lock().unwrap().clone()
    }

    fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for StubProvider {
    async fn start(&self, _request: &serde_json::Value) -> Result<ProviderRef, ProviderError> {
        let n = {
            let mut times = self.start_times.lock().unwrap();
            times.push(Instant::now());
            times.len()
        };
        if let Some(err) = self.start_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ProviderRef(format!("req-{n}")))
    }

    async fn poll(&self, _provider_ref: &ProviderRef) -> Result<PollOutcome, ProviderError> {
        if let Some(outcome) = self.poll_script.lock().unwrap().pop_front() {
            return Ok(outcome);
        }
        Ok(self.poll_fallback.lock().unwrap().clone())
    }

    async fn cancel(&self, _provider_ref: &ProviderRef) -> Result<(), ProviderError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn png_artifact() -> Artifact {
    Artifact {
        bytes: vec![0x89, b'P', b'N', b'G'],
        content_type: "image/png".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    provider: Arc<StubProvider>,
    artifacts: Arc<MemoryArtifactStore>,
    notifier: Arc<Notifier>,
    config: PipelineConfig,
    deps: PipelineDeps,
}

impl Harness {
    fn new() -> Self {
        let config = PipelineConfig {
            concurrency_limit: 2,
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            lease_duration: Duration::from_secs(5),
            max_processing_duration: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            storage_retry_budget: 3,
            provider_max_in_flight: 8,
        };
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(config.backoff()));
        let provider = Arc::new(StubProvider::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let notifier = Arc::new(Notifier::new());

        let deps = PipelineDeps {
            store: store.clone(),
            queue: queue.clone(),
            provider: provider.clone(),
            artifacts: artifacts.clone(),
            notifier: notifier.clone(),
        };
        Self {
            store,
            queue,
            provider,
            artifacts,
            notifier,
            config,
            deps,
        }
    }

    async fn submit(&self, owner: &str) -> Job {
        let job = self
            .store
            .create(CreateJob {
                owner_id: owner.to_string(),
                request: serde_json::json!({"prompt": "a lighthouse at dusk"}),
            })
            .await
            .unwrap();
        self.queue.enqueue(job.id, None).await.unwrap();
        job
    }

    fn spawn_pool(&self) -> (CancellationToken, JoinSet<()>) {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(self.deps.clone(), self.config.clone());
        let tasks = pool.spawn(cancel.clone());
        (cancel, tasks)
    }

    /// Poll the store until the job reaches a terminal state.
    async fn wait_for_terminal(&self, id: atelier_core::types::JobId) -> Job {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.store.get(id).await.unwrap().unwrap();
            if job.is_terminal() {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {id} did not reach a terminal state in time (status: {})",
                job.status().name()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Drain everything currently buffered on a broadcast receiver.
fn drain(rx: &mut tokio::sync::broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn job_succeeds_on_first_attempt() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));

    let job = h.submit("u1").await;
    assert_eq!(job.status(), JobStatus::Pending);

    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Succeeded);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.result.as_deref(), Some(format!("mem://{}", job.id).as_str()));
    assert_eq!(h.artifacts.upload_count(), 1);
    assert_eq!(h.provider.start_times().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn observed_statuses_never_regress() {
    let h = Harness::new();
    h.provider.script_polls([
        PollOutcome::Pending,
        PollOutcome::Progress(30),
        PollOutcome::Progress(60),
        PollOutcome::Succeeded(png_artifact()),
    ]);

    let job = h.submit("u1").await;
    let mut rx = h.notifier.subscribe(&job_channel(job.id)).await;

    let (cancel, mut tasks) = h.spawn_pool();
    h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    let events = drain(&mut rx);
    assert!(!events.is_empty());

    // Processing first, then non-decreasing progress, terminal last.
    assert_eq!(events[0].event_type, job_events::EVENT_JOB_PROCESSING);
    assert_eq!(events.last().unwrap().event_type, job_events::EVENT_JOB_SUCCEEDED);
    let progress: Vec<i16> = events.iter().filter_map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {progress:?}");
    let terminal_count = events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type.as_str(),
                job_events::EVENT_JOB_SUCCEEDED
                    | job_events::EVENT_JOB_FAILED
                    | job_events::EVENT_JOB_CANCELLED
            )
        })
        .count();
    assert_eq!(terminal_count, 1);
}

// ---------------------------------------------------------------------------
// Retry and exhaustion
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_retry_with_backoff_then_succeed() {
    let h = Harness::new();
    h.provider.fail_starts([
        ProviderError::transient("connection reset"),
        ProviderError::transient("connection reset"),
    ]);
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Succeeded);
    assert_eq!(done.attempts, 3);

    let starts = h.provider.start_times();
    assert_eq!(starts.len(), 3);
    // The gap between attempts is the backoff delay (jittered) plus worker
    // scheduling; it must sit between the base delay and the cap.
    let gap = starts[1] - starts[0];
    assert!(gap >= h.config.base_backoff, "retry came too fast: {gap:?}");
    assert!(gap < h.config.max_backoff, "retry came too slow: {gap:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_and_dead_letter() {
    let h = Harness::new();
    h.provider.fail_starts([
        ProviderError::transient("overloaded"),
        ProviderError::transient("overloaded"),
        ProviderError::transient("overloaded"),
    ]);

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;

    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.attempts, h.config.max_attempts);
    assert!(done.error.as_deref().unwrap().contains("retries exhausted"));
    assert_eq!(done.error_kind.as_deref(), Some("transient"));
    assert!(h.queue.dead_letter_ids().await.unwrap().contains(&job.id));

    // Never re-enqueued after dead-lettering.
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    assert!(h.queue.is_empty().await);
    assert_eq!(h.provider.start_times().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_failure_does_not_retry() {
    let h = Harness::new();
    h.provider.script_polls([PollOutcome::Failed {
        message: "content rejected".to_string(),
        kind: FailureKind::Permanent,
    }]);

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.error.as_deref(), Some("content rejected"));
    assert!(h.queue.dead_letter_ids().await.unwrap().contains(&job.id));
    assert_eq!(h.artifacts.upload_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn storage_budget_exhaustion_is_a_permanent_failure() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));
    h.artifacts.fail_next(h.config.storage_retry_budget as usize);

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Failed);
    assert!(done.error.as_deref().unwrap().contains("artifact upload failed"));
    assert_eq!(done.error_kind.as_deref(), Some("permanent"));
    assert_eq!(h.artifacts.upload_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn storage_retries_within_budget_still_succeed() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));
    h.artifacts.fail_next(1);

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Succeeded);
    // The storage retry consumed no job attempt.
    assert_eq!(done.attempts, 1);
    assert_eq!(h.artifacts.upload_count(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn cancel_while_processing_settles_within_a_poll_tick() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Progress(10));

    let job = h.submit("u1").await;
    let (cancel, mut tasks) = h.spawn_pool();

    // Wait until a worker is actually processing.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = h.store.get(job.id).await.unwrap().unwrap();
        if current.status() == JobStatus::Processing {
            break;
        }
        assert!(Instant::now() < deadline, "job never started processing");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.store.request_cancel(job.id).await.unwrap());
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Cancelled);
    assert_eq!(h.artifacts.upload_count(), 0);
    assert!(h.provider.cancel_count() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_before_lease_never_calls_the_provider() {
    let h = Harness::new();

    let job = h.submit("u1").await;
    assert!(h.store.request_cancel(job.id).await.unwrap());

    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Cancelled);
    assert_eq!(done.attempts, 0);
    assert!(h.provider.start_times().is_empty());
}

// ---------------------------------------------------------------------------
// Callback convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_success_callback_uploads_and_notifies_once() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));

    let job = h.submit("u1").await;
    h.store.set_provider_ref(job.id, "req-cb").await.unwrap();
    h.store
        .try_lease(job.id, "w1", h.config.lease_duration)
        .await
        .unwrap();
    h.store.begin_attempt(job.id, "w1").await.unwrap();

    let mut rx = h.notifier.subscribe(&job_channel(job.id)).await;

    let callback = ProviderCallback {
        provider_ref: "req-cb".to_string(),
        outcome: CallbackOutcome::Succeeded,
    };
    let first = handle_provider_callback(&h.deps, &h.config, &callback)
        .await
        .unwrap();
    let second = handle_provider_callback(&h.deps, &h.config, &callback)
        .await
        .unwrap();

    assert_eq!(first, CallbackDisposition::Applied);
    assert_eq!(second, CallbackDisposition::Ignored);
    assert_eq!(h.artifacts.upload_count(), 1);

    let done = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status(), JobStatus::Succeeded);

    let terminal_events = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event_type == job_events::EVENT_JOB_SUCCEEDED)
        .count();
    assert_eq!(terminal_events, 1);
}

#[tokio::test]
async fn callback_for_unknown_reference_is_reported() {
    let h = Harness::new();
    let callback = ProviderCallback {
        provider_ref: "no-such-ref".to_string(),
        outcome: CallbackOutcome::Succeeded,
    };
    let disposition = handle_provider_callback(&h.deps, &h.config, &callback)
        .await
        .unwrap();
    assert_eq!(disposition, CallbackDisposition::UnknownRef);
}

#[tokio::test]
async fn retryable_failure_callback_defers_to_the_poll_loop() {
    let h = Harness::new();
    let job = h.submit("u1").await;
    h.store.set_provider_ref(job.id, "req-cb").await.unwrap();

    let callback = ProviderCallback {
        provider_ref: "req-cb".to_string(),
        outcome: CallbackOutcome::Failed {
            message: "gpu preempted".to_string(),
            retryable: true,
        },
    };
    let disposition = handle_provider_callback(&h.deps, &h.config, &callback)
        .await
        .unwrap();

    assert_eq!(disposition, CallbackDisposition::Ignored);
    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert!(!job.is_terminal());
}

#[tokio::test]
async fn permanent_failure_callback_finalizes_and_dead_letters() {
    let h = Harness::new();
    let job = h.submit("u1").await;
    h.store.set_provider_ref(job.id, "req-cb").await.unwrap();

    let callback = ProviderCallback {
        provider_ref: "req-cb".to_string(),
        outcome: CallbackOutcome::Failed {
            message: "invalid prompt".to_string(),
            retryable: false,
        },
    };
    let disposition = handle_provider_callback(&h.deps, &h.config, &callback)
        .await
        .unwrap();

    assert_eq!(disposition, CallbackDisposition::Applied);
    let done = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("invalid prompt"));
    assert!(h.queue.dead_letter_ids().await.unwrap().contains(&job.id));
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn expired_lease_is_reclaimed_and_the_job_completes() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));

    // A worker claims the job, starts an attempt, and dies without ever
    // renewing its lease.
    let job = h.submit("u1").await;
    let dequeued = h.queue.dequeue("w-dead").await.unwrap();
    assert_eq!(dequeued, Some(job.id));
    assert!(h
        .store
        .try_lease(job.id, "w-dead", Duration::ZERO)
        .await
        .unwrap());
    assert_eq!(h.store.begin_attempt(job.id, "w-dead").await.unwrap(), 1);
    h.store.set_provider_ref(job.id, "req-orphan").await.unwrap();

    // The reaper notices the expired lease and re-enqueues.
    let reaper = LeaseReaper::new(h.deps.clone(), Duration::from_millis(50));
    assert_eq!(reaper.sweep().await.unwrap(), 1);
    let reclaimed = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(reclaimed.status(), JobStatus::Pending);
    assert_eq!(reclaimed.attempts, 1);

    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Succeeded);
    // Two processing starts in total: the dead worker's and the recovery.
    assert_eq!(done.attempts, 2);
    // The in-flight provider request was resumed, not restarted.
    assert!(h.provider.start_times().is_empty());
    assert_eq!(done.provider_ref.as_deref(), Some("req-orphan"));
}

#[tokio::test(flavor = "multi_thread")]
async fn reclaimed_job_with_spent_budget_fails_instead_of_rerunning() {
    let h = Harness::new();
    h.provider.set_poll_fallback(PollOutcome::Succeeded(png_artifact()));

    // Every attempt is consumed by a worker that dies mid-flight; the
    // reaper reclaims the job each time with its attempt count intact.
    let job = h.submit("u1").await;
    let reaper = LeaseReaper::new(h.deps.clone(), Duration::from_millis(50));
    for n in 1..=h.config.max_attempts {
        let dequeued = h.queue.dequeue("w-dead").await.unwrap();
        assert_eq!(dequeued, Some(job.id));
        assert!(h
            .store
            .try_lease(job.id, "w-dead", Duration::ZERO)
            .await
            .unwrap());
        assert_eq!(h.store.begin_attempt(job.id, "w-dead").await.unwrap(), n);
        assert_eq!(reaper.sweep().await.unwrap(), 1);
    }
    let reclaimed = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(reclaimed.status(), JobStatus::Pending);
    assert_eq!(reclaimed.attempts, h.config.max_attempts);

    // A healthy worker picks the job up but must not run a fourth attempt.
    let (cancel, mut tasks) = h.spawn_pool();
    let done = h.wait_for_terminal(job.id).await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    assert_eq!(done.status(), JobStatus::Failed);
    assert_eq!(done.attempts, h.config.max_attempts);
    assert!(done.error.as_deref().unwrap().contains("retries exhausted"));
    assert!(h.queue.dead_letter_ids().await.unwrap().contains(&job.id));
    // No provider request was ever made on its behalf.
    assert!(h.provider.start_times().is_empty());
    assert_eq!(h.artifacts.upload_count(), 0);
}
