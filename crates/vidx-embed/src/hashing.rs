//! Deterministic local embeddings.
//!
//! Text is tokenised into lowercase alphanumeric words; each unigram and
//! adjacent bigram is hashed into a signed bucket. Images are reduced to an
//! 8x8x8 RGB colour histogram folded into the same width. Both outputs are
//! unit vectors, but the two kinds are not aligned with each other.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::embedder::{normalize_vector, Embedder, TextMode};
use crate::error::{EmbedError, EmbedResult};

const MODEL_ID: &str = "hashing-v1";
const BIGRAM_WEIGHT: f32 = 0.5;
const HISTOGRAM_BINS: usize = 8;
const THUMBNAIL_EDGE: u32 = 64;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vec, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vec, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        normalize_vector(&mut vec);
        vec
    }

    pub fn embed_image_file(&self, path: &Path) -> EmbedResult<Vec<f32>> {
        let img = image::open(path).map_err(|e| EmbedError::Image {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let rgb = image::imageops::thumbnail(&img.to_rgb8(), THUMBNAIL_EDGE, THUMBNAIL_EDGE);

        let shift = 256 / HISTOGRAM_BINS;
        let mut vec = vec![0.0f32; self.dimension];
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let bin = (r as usize / shift) * HISTOGRAM_BINS * HISTOGRAM_BINS
                + (g as usize / shift) * HISTOGRAM_BINS
                + (b as usize / shift);
            vec[bin % self.dimension] += 1.0;
        }
        // Damp dominant colours.
        for x in vec.iter_mut() {
            *x = x.sqrt();
        }
        normalize_vector(&mut vec);
        Ok(vec)
    }

    fn add_feature(&self, vec: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_DIMENSION)
    }
}

/// Lowercase alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_texts(&self, texts: &[String], _mode: TextMode) -> EmbedResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_images(&self, paths: &[PathBuf]) -> EmbedResult<Vec<Vec<f32>>> {
        let this = self.clone();
        let paths = paths.to_vec();
        debug!(count = paths.len(), "Hashing keyframes");
        tokio::task::spawn_blocking(move || {
            paths
                .iter()
                .map(|p| this.embed_image_file(p))
                .collect::<EmbedResult<Vec<_>>>()
        })
        .await
        .map_err(|e| EmbedError::RequestFailed(format!("image worker panicked: {}", e)))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}
