use std::sync::Arc;

use atelier_core::config::PipelineConfig;
use atelier_db::store::JobStore;
use atelier_events::Notifier;
use atelier_queue::WorkQueue;
use atelier_worker::PipelineDeps;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Every pipeline collaborator is an injected trait object; handlers never
/// reach for a global. Cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Durable job records.
    pub store: Arc<dyn JobStore>,
    /// Scheduling queue feeding the worker pool.
    pub queue: Arc<dyn WorkQueue>,
    /// Lifecycle event hub for WebSocket subscribers.
    pub notifier: Arc<Notifier>,
    /// Full dependency bundle, shared with the in-process worker pool and
    /// the callback handler.
    pub deps: PipelineDeps,
    /// Pipeline tuning knobs (used by the callback handler).
    pub pipeline: Arc<PipelineConfig>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Assemble state from a dependency bundle plus configuration.
    pub fn new(deps: PipelineDeps, pipeline: PipelineConfig, config: ServerConfig) -> Self {
        Self {
            store: deps.store.clone(),
            queue: deps.queue.clone(),
            notifier: deps.notifier.clone(),
            deps,
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
        }
    }
}
