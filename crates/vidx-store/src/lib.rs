//! Media store: videos, scenes and their embedding vectors.
//!
//! `PgMediaStore` keeps everything in PostgreSQL with pgvector columns and
//! HNSW indexes. `MemoryMediaStore` implements the same contract in process.

pub mod config;
pub mod error;
pub mod lexical;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryMediaStore;
pub use postgres::PgMediaStore;
pub use store::{
    MediaStore, Page, Precision, SceneFilter, SceneWithVideo, ScoredScene, VideoPatch,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
