//! Store error types.

use thiserror::Error;
use vidx_models::VideoId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Content already ingested as video {existing_video_id}")]
    DuplicateContent { existing_video_id: VideoId },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn video_not_found(id: VideoId) -> Self {
        Self::NotFound {
            entity: "video",
            id: id.to_string(),
        }
    }

    pub fn scene_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "scene",
            id: id.to_string(),
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
