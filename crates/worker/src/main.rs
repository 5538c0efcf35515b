use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_core::config::PipelineConfig;
use atelier_db::postgres::PgJobStore;
use atelier_db::store::JobStore;
use atelier_provider::http::HttpProvider;
use atelier_provider::limiter::RateLimited;
use atelier_provider::GenerationProvider;
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
                .unwrap_or_else(|_| "atelier_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = PipelineConfig::from_env();
    config.validate().expect("Invalid pipeline configuration");
    tracing::info!(
        concurrency = config.concurrency_limit,
        max_attempts = config.max_attempts,
        "Loaded pipeline configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = atelier_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Pipeline seams ---
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queue: Arc<dyn WorkQueue> = Arc::new(PgQueue::new(pool.clone(), config.backoff()));

    let provider_url = std::env::var("PROVIDER_URL").expect("PROVIDER_URL must be set");
    let provider: Arc<dyn GenerationProvider> = Arc::new(RateLimited::new(
        HttpProvider::new(provider_url),
        config.provider_max_in_flight,
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

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let reaper = LeaseReaper::new(deps.clone(), config.lease_duration);
    let reaper_cancel = cancel.clone();
    let reaper_handle = tokio::spawn(async move { reaper.run(reaper_cancel).await });

    let pool = WorkerPool::new(deps, config);
    let mut workers = pool.spawn(cancel.clone());

    // --- Shutdown ---
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    while workers.join_next().await.is_some() {}
    let _ = reaper_handle.await;
    tracing::info!("Worker shut down cleanly");
}
