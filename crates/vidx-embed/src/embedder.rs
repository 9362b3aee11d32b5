//! The embedding seam and vector helpers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::{EmbedError, EmbedResult};
use crate::hashing::HashingEmbedder;
use crate::http::HttpEmbedder;

/// How a piece of text will be used. Some models embed search queries and
/// indexed passages with different prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    Query,
    Passage,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One unit vector per input text, in order.
    async fn embed_texts(&self, texts: &[String], mode: TextMode) -> EmbedResult<Vec<Vec<f32>>>;

    /// One unit vector per image file, in order.
    async fn embed_images(&self, paths: &[PathBuf]) -> EmbedResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_id(&self) -> &str;

    async fn embed_query(&self, text: &str) -> EmbedResult<Vec<f32>> {
        self.embed_texts(&[text.to_string()], TextMode::Query)
            .await?
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Build the configured backend.
pub fn build_embedder(config: &EmbedConfig) -> EmbedResult<Arc<dyn Embedder>> {
    if config.dimension == 0 {
        return Err(EmbedError::Config("embedding dimension must be positive".to_string()));
    }
    info!(
        backend = ?config.backend,
        model = %config.model,
        dimension = config.dimension,
        "Initializing embedder"
    );
    Ok(match config.backend {
        EmbedBackend::Hashing => Arc::new(HashingEmbedder::new(config.dimension)),
        EmbedBackend::Http => Arc::new(HttpEmbedder::new(config.clone())?),
    })
}

/// Normalize a vector to unit length (L2 normalization).
pub fn normalize_vector(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; zero when either side has no magnitude or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        0.0
    } else {
        dot / (na * nb)
    }
}
