//! Embeddings for scene captions, keyframes and search queries.
//!
//! Text and visual vectors share one space of `dimension()` floats, are
//! L2-normalised and are compared by cosine similarity.

pub mod config;
pub mod embedder;
pub mod error;
pub mod hashing;
pub mod http;

pub use config::{EmbedBackend, EmbedConfig};
pub use embedder::{build_embedder, cosine_similarity, normalize_vector, Embedder, TextMode};
pub use error::{EmbedError, EmbedResult};
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
