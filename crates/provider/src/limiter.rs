//! Outbound rate limiting for provider calls.
//!
//! The provider enforces its own request ceiling regardless of how many
//! workers are running, so [`RateLimited`] caps concurrent outbound calls
//! with a semaphore. Callers queue on the permit rather than being
//! rejected; the worker's poll cadence bounds how long they wait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::client::{GenerationProvider, PollOutcome, ProviderError, ProviderRef};

/// Decorator capping in-flight calls to the wrapped provider.
pub struct RateLimited<P> {
    inner: P,
    permits: Arc<Semaphore>,
}

impl<P: GenerationProvider> RateLimited<P> {
    /// Wrap `inner`, allowing at most `max_in_flight` concurrent calls.
    pub fn new(inner: P, max_in_flight: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ProviderError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ProviderError::transient("provider limiter closed"))
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for RateLimited<P> {
    async fn start(&self, request: &serde_json::Value) -> Result<ProviderRef, ProviderError> {
        let _permit = self.acquire().await?;
        self.inner.start(request).await
    }

    async fn poll(&self, provider_ref: &ProviderRef) -> Result<PollOutcome, ProviderError> {
        let _permit = self.acquire().await?;
        self.inner.poll(provider_ref).await
    }

    async fn cancel(&self, provider_ref: &ProviderRef) -> Result<(), ProviderError> {
        let _permit = self.acquire().await?;
        self.inner.cancel(provider_ref).await
    }
}
