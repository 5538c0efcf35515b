//! In-memory artifact store used by the hermetic pipeline tests.
//!
//! Counts uploads so tests can assert that idempotent finalization never
//! stores an artifact twice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ArtifactMeta, ArtifactStore, StorageError};

#[derive(Default)]
pub struct MemoryArtifactStore {
    uploads: AtomicUsize,
    /// When set, the next N uploads fail (for exercising the retry budget).
    failures_remaining: Mutex<usize>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` uploads fail with a transient storage error.
    pub fn fail_next(&self, n: usize) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    /// Total successful uploads so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Upload("injected failure".into()));
            }
        }

        let _ = bytes;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mem://{}", meta.job_id))
    }
}
