//! Worker error types.

use thiserror::Error;
use vidx_embed::EmbedError;
use vidx_media::MediaError;
use vidx_models::VideoId;
use vidx_queue::QueueError;
use vidx_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("duplicate of video {existing}")]
    Duplicate { existing: VideoId },

    #[error("Stage failed: {0}")]
    StageFailed(String),

    #[error("Stage timed out after {0} seconds")]
    Timeout(u64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn stage_failed(msg: impl Into<String>) -> Self {
        Self::StageFailed(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Bad payloads, missing rows, duplicate content and unusable input
    /// files fail for good; tool, backend and infrastructure failures get
    /// another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Validation(_)
            | WorkerError::VideoNotFound(_)
            | WorkerError::Duplicate { .. } => false,
            WorkerError::StageFailed(_) | WorkerError::Timeout(_) | WorkerError::Io(_) => true,
            WorkerError::Store(e) => !matches!(
                e,
                StoreError::NotFound { .. }
                    | StoreError::DuplicateContent { .. }
                    | StoreError::DimensionMismatch { .. }
                    | StoreError::InvalidInput(_)
            ),
            WorkerError::Queue(e) => e.is_infrastructure(),
            WorkerError::Media(e) => !e.is_permanent(),
            WorkerError::Embed(e) => !matches!(
                e,
                EmbedError::DimensionMismatch { .. } | EmbedError::Config(_) | EmbedError::Image { .. }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_retry_classification() {
        assert!(!WorkerError::validation("bad").is_retryable());
        assert!(!WorkerError::VideoNotFound(VideoId(1)).is_retryable());
        assert!(!WorkerError::Duplicate { existing: VideoId(1) }.is_retryable());
        assert!(!WorkerError::Media(MediaError::FileNotFound(PathBuf::from("/x"))).is_retryable());
        assert!(!WorkerError::Store(StoreError::video_not_found(VideoId(2))).is_retryable());

        assert!(WorkerError::Timeout(10).is_retryable());
        assert!(WorkerError::Media(MediaError::ffmpeg_failed("boom", None, Some(1))).is_retryable());
        assert!(WorkerError::Embed(EmbedError::ServiceUnavailable("down".into())).is_retryable());
    }

    #[test]
    fn test_duplicate_message() {
        let err = WorkerError::Duplicate { existing: VideoId(42) };
        assert_eq!(err.to_string(), "duplicate of video 42");
    }
}
