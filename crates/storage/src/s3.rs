//! S3-backed artifact store.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::{extension_for, ArtifactMeta, ArtifactStore, StorageError};

/// Stores artifacts as S3 objects under `{prefix}/{job_id}.{ext}` and
/// returns `s3://bucket/key` references.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Build a store from ambient AWS configuration (env/instance profile).
    pub async fn from_env(bucket: String, prefix: String) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    fn key_for(&self, meta: &ArtifactMeta) -> String {
        let ext = extension_for(&meta.content_type);
        if self.prefix.is_empty() {
            format!("{}.{ext}", meta.job_id)
        } else {
            format!("{}/{}.{ext}", self.prefix, meta.job_id)
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn store(&self, bytes: &[u8], meta: &ArtifactMeta) -> Result<String, StorageError> {
        let key = self.key_for(meta);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&meta.content_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::Upload(format!("s3 put_object failed: {e}")))?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size = bytes.len(),
            "Artifact uploaded to S3",
        );
        Ok(format!("s3://{}/{key}", self.bucket))
    }
}
