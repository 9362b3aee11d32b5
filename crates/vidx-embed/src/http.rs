//! Client for a remote embedding model service.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbedConfig;
use crate::embedder::{normalize_vector, Embedder, TextMode};
use crate::error::{EmbedError, EmbedResult};

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    device: &'a str,
    mode: TextMode,
    texts: &'a [String],
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    device: &'a str,
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Embedder backed by an HTTP model service exposing `/embed/text` and
/// `/embed/image`.
pub struct HttpEmbedder {
    http: Client,
    config: EmbedConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbedConfig) -> EmbedResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EmbedError::Network)?;

        Ok(Self { http, config })
    }

    /// Check if the model service is healthy.
    pub async fn health_check(&self) -> EmbedResult<bool> {
        let url = format!("{}/health", self.config.url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Embedding service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Embedding service health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B, expected: usize) -> EmbedResult<Vec<Vec<f32>>> {
        let url = format!("{}{}", self.config.url, path);
        debug!(count = expected, "Requesting embeddings from {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(EmbedError::Network)?;

                let status = response.status();
                if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(EmbedError::ServiceUnavailable(format!("{} returned {}", url, status)));
                }
                Ok(response)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::RequestFailed(format!(
                "Embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response.json().await?;
        self.validate(parsed.embeddings, expected)
    }

    fn validate(&self, mut embeddings: Vec<Vec<f32>>, expected: usize) -> EmbedResult<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                expected,
                embeddings.len()
            )));
        }
        for vec in embeddings.iter_mut() {
            if vec.len() != self.config.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: vec.len(),
                });
            }
            normalize_vector(vec);
        }
        Ok(embeddings)
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> EmbedResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EmbedResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Embedding request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_texts(&self, texts: &[String], mode: TextMode) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = TextRequest {
            model: &self.config.model,
            device: &self.config.device,
            mode,
            texts,
        };
        self.post("/embed/text", &body, texts.len()).await
    }

    async fn embed_images(&self, paths: &[PathBuf]) -> EmbedResult<Vec<Vec<f32>>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let body = ImageRequest {
            model: &self.config.model,
            device: &self.config.device,
            paths: paths.iter().map(|p| p.to_string_lossy().to_string()).collect(),
        };
        self.post("/embed/image", &body, paths.len()).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
