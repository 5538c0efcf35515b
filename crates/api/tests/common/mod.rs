//! Shared harness for API integration tests.
//!
//! Builds the real router over in-memory seams so tests exercise the same
//! middleware stack and handlers as production, without a database or a
//! provider on the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_core::config::PipelineConfig;
use atelier_db::memory::MemoryJobStore;
use atelier_events::Notifier;
use atelier_provider::{GenerationProvider, PollOutcome, ProviderError, ProviderRef};
use atelier_queue::memory::MemoryQueue;
use atelier_storage::memory::MemoryArtifactStore;
use atelier_worker::PipelineDeps;

/// Provider stub that accepts every request and never finishes it. API
/// tests do not run the worker pool, so nothing ever polls it to completion.
pub struct IdleProvider;

#[async_trait]
impl GenerationProvider for IdleProvider {
    async fn start(&self, _request: &serde_json::Value) -> Result<ProviderRef, ProviderError> {
        Ok(ProviderRef("test-ref".to_string()))
    }

    async fn poll(&self, _provider_ref: &ProviderRef) -> Result<PollOutcome, ProviderError> {
        Ok(PollOutcome::Pending)
    }

    async fn cancel(&self, _provider_ref: &ProviderRef) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub notifier: Arc<Notifier>,
}

fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        concurrency_limit: 1,
        max_attempts: 3,
        base_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(2),
        lease_duration: Duration::from_secs(5),
        max_processing_duration: Duration::from_secs(10),
        poll_interval: Duration::from_millis(20),
        storage_retry_budget: 3,
        provider_max_in_flight: 8,
    }
}

fn test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        list_limit: 50,
    }
}

/// Build the application router over fresh in-memory seams.
pub fn build_test_app() -> TestApp {
    let pipeline = test_pipeline_config();
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new(pipeline.backoff()));
    let notifier = Arc::new(Notifier::new());

    let deps = PipelineDeps {
        store: store.clone(),
        queue: queue.clone(),
        provider: Arc::new(IdleProvider),
        artifacts: Arc::new(MemoryArtifactStore::new()),
        notifier: notifier.clone(),
    };

    let config = test_server_config();
    let state = AppState::new(deps, pipeline, config.clone());
    let app = build_app_router(state, &config);

    TestApp {
        app,
        store,
        queue,
        notifier,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_as(app: Router, uri: &str, caller: &str) -> Response<Body> {
    app.oneshot(
        Request::get(uri)
            .header("x-caller-id", caller)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(
    app: Router,
    uri: &str,
    caller: Option<&str>,
    body: serde_json::Value,
) -> Response<Body> {
    let mut request = Request::post(uri).header("content-type", "application/json");
    if let Some(caller) = caller {
        request = request.header("x-caller-id", caller);
    }
    app.oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
