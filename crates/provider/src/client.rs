//! The [`GenerationProvider`] trait and its error taxonomy.

use async_trait::async_trait;

use atelier_core::outcome::FailureKind;

/// Provider-side identifier for an in-flight generation request.
///
/// Assigned by the provider on `start` and used to correlate polls and
/// completion callbacks back to the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRef(pub String);

impl std::fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generated artifact as returned by the provider.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Result of one poll of an in-flight generation request.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Queued provider-side, no progress yet.
    Pending,
    /// Generation underway; percentage in 0..=100.
    Progress(i16),
    /// Generation finished; the artifact is ready to be stored.
    Succeeded(Artifact),
    /// Generation failed. `kind` decides whether the job retries.
    Failed { message: String, kind: FailureKind },
}

/// Errors from the provider client itself (as opposed to a generation
/// that the provider reports as failed).
#[derive(Debug, thiserror::Error)]
#[error("Provider error ({}): {message}", kind.name())]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify an HTTP status code.
    ///
    /// Timeouts, rate limits, and server errors are worth retrying; any
    /// other client error (invalid request, content rejected) is not.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = format!("provider returned {status}: {body}");
        match status {
            408 | 429 | 500..=599 => Self::transient(message),
            _ => Self::permanent(message),
        }
    }
}

/// Abstraction over the external generation service.
///
/// Implementations must be safe to share across workers (`Arc<dyn ...>`).
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Create a generation request. The request payload is opaque to the
    /// pipeline and forwarded verbatim.
    async fn start(&self, request: &serde_json::Value) -> Result<ProviderRef, ProviderError>;

    /// Poll the state of an in-flight request.
    async fn poll(&self, provider_ref: &ProviderRef) -> Result<PollOutcome, ProviderError>;

    /// Ask the provider to abandon an in-flight request. Best effort; a
    /// failure here does not block job cancellation.
    async fn cancel(&self, provider_ref: &ProviderRef) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(ProviderError::from_status(500, String::new()).is_transient());
        assert!(ProviderError::from_status(503, String::new()).is_transient());
        assert!(ProviderError::from_status(429, String::new()).is_transient());
        assert!(ProviderError::from_status(408, String::new()).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!ProviderError::from_status(400, String::new()).is_transient());
        assert!(!ProviderError::from_status(403, String::new()).is_transient());
        assert!(!ProviderError::from_status(422, String::new()).is_transient());
    }

    #[test]
    fn error_message_names_the_kind() {
        let err = ProviderError::from_status(502, "bad gateway".into());
        let text = err.to_string();
        assert!(text.contains("transient"));
        assert!(text.contains("502"));
    }
}
