//! Durable artifact storage behind the [`ArtifactStore`] trait.
//!
//! Workers hand finished artifacts to a store and persist only the
//! returned reference on the job record. Upload failures are retried
//! locally (see [`retry`]) without consuming job attempts.

use async_trait::async_trait;

use atelier_core::types::JobId;

pub mod local;
pub mod memory;
pub mod retry;
pub mod s3;

/// Metadata recorded alongside an artifact.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub job_id: JobId,
    pub content_type: String,
}

/// Errors from an artifact store backend. All are treated as transient up
/// to the retry budget; budget exhaustion escalates to a permanent job
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable blob storage: accepts artifact bytes, returns a retrievable
/// reference.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError>;
}

/// File extension for a content type, used when composing object keys.
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_content_types_map_to_extensions() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }
}
