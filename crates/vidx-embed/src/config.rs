//! Embedding backend configuration.

use std::str::FromStr;
use std::time::Duration;

/// Dimension of the CLIP ViT-B/32 joint text/image space.
pub const DEFAULT_DIMENSION: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedBackend {
    /// Deterministic feature hashing, no model required
    #[default]
    Hashing,
    /// Remote model service
    Http,
}

impl FromStr for EmbedBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" | "local" => Ok(Self::Hashing),
            "http" | "remote" => Ok(Self::Http),
            other => Err(format!("unknown embedding backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    /// Model identifier passed to the service and recorded on results
    pub model: String,
    /// Base URL of the model service
    pub url: String,
    /// Device hint for the model service (`cpu`, `cuda`, `cuda:1`)
    pub device: String,
    pub dimension: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::Hashing,
            model: "clip-vit-b-32".to_string(),
            url: "http://localhost:8001".to_string(),
            device: "cpu".to_string(),
            dimension: DEFAULT_DIMENSION,
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

impl EmbedConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("EMBEDDING_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backend),
            model: std::env::var("EMBEDDING_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.model),
            url: std::env::var("EMBEDDING_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.url),
            device: std::env::var("EMBEDDING_DEVICE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.device),
            dimension: std::env::var("EMBEDDING_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|d: &usize| *d > 0)
                .unwrap_or(defaults.dimension),
            timeout: Duration::from_secs(
                std::env::var("EMBEDDING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("EMBEDDING_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}
