//! Filesystem artifact store for local development.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{extension_for, ArtifactMeta, ArtifactStore, StorageError};

/// Writes artifacts under a base directory and returns `file://` references.
pub struct LocalArtifactStore {
    base_path: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        let file_name = format!("{}.{}", meta.job_id, extension_for(&meta.content_type));
        let path = self.base_path.join(file_name);
        tokio::fs::write(&path, bytes).await?;

        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_file_and_returns_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let meta = ArtifactMeta {
            job_id: uuid::Uuid::now_v7(),
            content_type: "image/png".into(),
        };

        let reference = store.store(b"pixels", &meta).await.unwrap();
        assert!(reference.starts_with("file://"));
        assert!(reference.ends_with(".png"));

        let path = reference.strip_prefix("file://").unwrap();
        let contents = tokio::fs::read(path).await.unwrap();
        assert_eq!(contents, b"pixels");
    }
}
