//! The worker pool: leases jobs from the queue, drives them through the
//! generation provider and artifact store, and finalizes them in the job
//! store, emitting events at every transition.
//!
//! Workers are stateless and interchangeable; all coordination happens
//! through the job store's lease CAS and the queue. Both the poll loop and
//! the inbound provider callback converge on [`finalize::finalize_job`].

use std::sync::Arc;

use atelier_db::store::JobStore;
use atelier_events::Notifier;
use atelier_provider::GenerationProvider;
use atelier_queue::WorkQueue;
use atelier_storage::ArtifactStore;

pub mod callback;
pub mod finalize;
pub mod pool;
pub mod reaper;
mod runner;

/// Shared handles injected into workers, the reaper, and the callback
/// handler. Cheap to clone.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub provider: Arc<dyn GenerationProvider>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub notifier: Arc<Notifier>,
}
