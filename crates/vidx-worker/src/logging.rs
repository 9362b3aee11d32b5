//! Structured job logging.

use tracing::{error, info, warn, Span};
use vidx_models::{Job, JobType, VideoId};

/// Stamps job id, stage and video id on every lifecycle event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: JobType,
    video_id: VideoId,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            stage: job.job_type,
            video_id: job.video_id(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> JobType {
        self.stage
    }

    /// Span carrying the job context, for instrumenting a whole stage run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            stage = %self.stage,
            video_id = %self.video_id
        )
    }
}
