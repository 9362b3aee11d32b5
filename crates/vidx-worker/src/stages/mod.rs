//! Stage handlers.
//!
//! Every handler is safe to run again against a video that already carries
//! part of its results: finished work is detected and skipped.

mod captions;
mod embeddings;
mod ingestion;
mod scenes;

use std::path::PathBuf;
use std::sync::Arc;

use vidx_embed::Embedder;
use vidx_media::MediaToolkit;
use vidx_models::{Job, JobPayload, StatusUpdate, Video, VideoId};
use vidx_queue::JobQueue;
use vidx_store::MediaStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

pub use captions::extract_captions;
pub use embeddings::generate_embeddings;
pub use ingestion::ingest_video;
pub use scenes::detect_scenes;

/// Everything a stage handler touches.
pub struct StageContext {
    pub store: Arc<dyn MediaStore>,
    pub queue: Arc<dyn JobQueue>,
    pub media: Arc<dyn MediaToolkit>,
    pub embedder: Arc<dyn Embedder>,
    /// Scenes embedded per backend call
    pub embed_batch_size: usize,
}

impl StageContext {
    pub fn new(
        store: Arc<dyn MediaStore>,
        queue: Arc<dyn JobQueue>,
        media: Arc<dyn MediaToolkit>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            queue,
            media,
            embedder,
            embed_batch_size: 16,
        }
    }

    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    /// Best-effort progress report; a failed write only costs visibility.
    pub(crate) async fn progress(&self, job: &Job, logger: &JobLogger, percent: u8, message: &str) {
        logger.log_progress(message);
        if let Err(e) = self
            .queue
            .update_status(&job.id, StatusUpdate::running(percent))
            .await
        {
            logger.log_warning(&format!("progress update failed: {}", e));
        }
    }

    /// Load the job's video, turning a missing row into a permanent failure.
    pub(crate) async fn load_video(&self, video_id: VideoId) -> WorkerResult<Video> {
        self.store.get_video(video_id).await.map_err(|e| {
            if e.is_not_found() {
                WorkerError::VideoNotFound(video_id)
            } else {
                e.into()
            }
        })
    }
}

/// Run the handler for `job`'s stage.
pub async fn run_stage(ctx: &StageContext, job: &Job) -> WorkerResult<()> {
    job.payload.validate().map_err(WorkerError::validation)?;
    let logger = JobLogger::new(job);

    match &job.payload {
        JobPayload::VideoIngestion { .. } => ingest_video(ctx, job, &logger).await,
        JobPayload::SceneDetection { .. } => detect_scenes(ctx, job, &logger).await,
        JobPayload::CaptionExtraction { .. } => extract_captions(ctx, job, &logger).await,
        JobPayload::EmbeddingGeneration { .. } => generate_embeddings(ctx, job, &logger).await,
    }
}

pub(crate) fn source_path(video: &Video) -> WorkerResult<PathBuf> {
    if video.filepath.trim().is_empty() {
        return Err(WorkerError::validation(format!(
            "video {} has no file path",
            video.id
        )));
    }
    Ok(PathBuf::from(&video.filepath))
}
