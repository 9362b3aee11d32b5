//! Aggregate counters reported by `/health` and `/api/v1/stats`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobType;

/// Corpus totals from the media store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaStats {
    pub total_videos: i64,
    pub completed_videos: i64,
    pub failed_videos: i64,
    pub total_scenes: i64,
    /// Scenes carrying both embeddings
    pub embedded_scenes: i64,
    pub captioned_scenes: i64,
    /// Stored subtitle cues across all videos
    pub total_captions: i64,
    /// Seconds of footage across completed videos
    pub total_duration_secs: f64,
}

/// Backlog of one job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueueDepth {
    pub job_type: JobType,
    pub pending: u64,
    pub processing: u64,
}
