use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_core::config::PipelineConfig;
use atelier_db::memory::MemoryJobStore;
use atelier_db::postgres::PgJobStore;
use atelier_db::store::JobStore;
use atelier_provider::http::HttpProvider;
use atelier_provider::limiter::RateLimited;
use atelier_provider::GenerationProvider;
use atelier_queue::memory::MemoryQueue;
use atelier_queue::postgres::PgQueue;
use atelier_queue::WorkQueue;
use atelier_storage::local::LocalArtifactStore;
use atelier_storage::s3::S3ArtifactStore;
use atelier_storage::ArtifactStore;
use atelier_worker::pool::WorkerPool;
use atelier_worker::reaper::LeaseReaper;
use atelier_worker::PipelineDeps;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,atelier_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    pipeline.validate().expect("Invalid pipeline configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Job store and queue ---
    // `STORE=memory` runs fully in-process for local development; anything
    // else expects a Postgres `DATABASE_URL`.
    let (store, queue): (Arc<dyn JobStore>, Arc<dyn WorkQueue>) =
        if std::env::var("STORE").as_deref() == Ok("memory") {
            tracing::warn!("Using in-memory job store; jobs will not survive a restart");
            (
                Arc::new(MemoryJobStore::new()),
                Arc::new(MemoryQueue::new(pipeline.backoff())),
            )
        } else {
            let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let pool = atelier_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            atelier_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            atelier_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database ready");
            (
                Arc::new(PgJobStore::new(pool.clone())),
                Arc::new(PgQueue::new(pool, pipeline.backoff())),
            )
        };

    // --- Provider and storage ---
    let provider_url = std::env::var("PROVIDER_URL").expect("PROVIDER_URL must be set");
    let provider: Arc<dyn GenerationProvider> = Arc::new(RateLimited::new(
        HttpProvider::new(provider_url),
        pipeline.provider_max_in_flight,
    ));

    let artifacts: Arc<dyn ArtifactStore> = match std::env::var("ARTIFACT_BUCKET") {
        Ok(bucket) => {
            let prefix =
                std::env::var("ARTIFACT_PREFIX").unwrap_or_else(|_| "artifacts".to_string());
            tracing::info!(bucket = %bucket, "Using S3 artifact storage");
            Arc::new(S3ArtifactStore::from_env(bucket, prefix).await)
        }
        Err(_) => {
            let dir =
                std::env::var("ARTIFACT_DIR").unwrap_or_else(|_| "./artifacts".to_string());
            tracing::info!(dir = %dir, "Using local artifact storage");
            Arc::new(LocalArtifactStore::new(dir))
        }
    };

    let notifier = Arc::new(atelier_events::Notifier::new());

    let deps = PipelineDeps {
        store,
        queue,
        provider,
        artifacts,
        notifier,
    };

    // --- In-process pipeline (worker pool + lease reaper) ---
    let cancel = tokio_util::sync::CancellationToken::new();

    let reaper = LeaseReaper::new(deps.clone(), pipeline.lease_duration);
    let reaper_cancel = cancel.clone();
    tokio::spawn(async move { reaper.run(reaper_cancel).await });

    let pool = WorkerPool::new(deps.clone(), pipeline.clone());
    let _workers = pool.spawn(cancel.clone());

    // --- Router and server ---
    let state = AppState::new(deps, pipeline, config.clone());
    let app = build_app_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST/PORT");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .expect("Server error");

    tracing::info!("API server shut down cleanly");
}

/// Resolve on Ctrl-C and propagate the shutdown to background tasks.
async fn shutdown_signal(cancel: tokio_util::sync::CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
