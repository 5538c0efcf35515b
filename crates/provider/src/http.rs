//! REST client for the generation provider's HTTP API.
//!
//! Wraps the provider endpoints (request submission, status polling,
//! cancellation) using [`reqwest`].

use serde::Deserialize;

use atelier_core::outcome::FailureKind;

use crate::client::{
    Artifact, GenerationProvider, PollOutcome, ProviderError, ProviderRef,
};

/// HTTP client for the generation provider.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Response returned when a generation request is accepted.
#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

/// Response returned by the status endpoint.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<i16>,
    #[serde(default)]
    artifact_url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    /// Set by the provider when a failure is worth retrying.
    #[serde(default)]
    retryable: bool,
}

impl HttpProvider {
    /// Create a client for the provider at `base_url` (e.g.
    /// `https://provider.example.com`).
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Map a transport-level error. Network failures are always retryable.
    fn transport_error(err: reqwest::Error) -> ProviderError {
        ProviderError::transient(format!("request failed: {err}"))
    }

    /// Check the response status, surfacing non-2xx as a classified error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), body))
    }

    /// Download the finished artifact.
    async fn fetch_artifact(
        &self,
        url: &str,
        content_type: Option<String>,
    ) -> Result<Artifact, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;

        let content_type = content_type
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(Self::transport_error)?
            .to_vec();

        Ok(Artifact {
            bytes,
            content_type,
        })
    }

    /// Translate a status payload into a [`PollOutcome`].
    fn classify_failure(status: &StatusResponse) -> PollOutcome {
        let kind = if status.retryable {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        PollOutcome::Failed {
            message: status
                .error
                .clone()
                .unwrap_or_else(|| format!("provider reported status '{}'", status.status)),
            kind,
        }
    }
}

#[async_trait::async_trait]
impl GenerationProvider for HttpProvider {
    async fn start(&self, request: &serde_json::Value) -> Result<ProviderRef, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/generations", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;

        let started: StartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("malformed start response: {e}")))?;

        tracing::debug!(provider_ref = %started.id, "Generation request created");
        Ok(ProviderRef(started.id))
    }

    async fn poll(&self, provider_ref: &ProviderRef) -> Result<PollOutcome, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/generations/{provider_ref}", self.base_url))
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response).await?;

        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(format!("malformed status response: {e}")))?;

        match status.status.as_str() {
            "pending" | "queued" => Ok(PollOutcome::Pending),
            "processing" => Ok(PollOutcome::Progress(
                status.progress.unwrap_or(0).clamp(0, 100),
            )),
            "succeeded" => {
                let url = status.artifact_url.as_deref().ok_or_else(|| {
                    ProviderError::permanent("succeeded response without artifact_url")
                })?;
                let artifact = self.fetch_artifact(url, status.content_type.clone()).await?;
                Ok(PollOutcome::Succeeded(artifact))
            }
            // "flagged": the provider produced something but marked it
            // unusable. Not retryable unless the provider says so.
            "failed" | "flagged" => Ok(Self::classify_failure(&status)),
            other => Err(ProviderError::permanent(format!(
                "unknown provider status '{other}'"
            ))),
        }
    }

    async fn cancel(&self, provider_ref: &ProviderRef) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/generations/{provider_ref}/cancel",
                self.base_url
            ))
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response).await?;
        tracing::debug!(provider_ref = %provider_ref, "Generation request cancelled");
        Ok(())
    }
}
