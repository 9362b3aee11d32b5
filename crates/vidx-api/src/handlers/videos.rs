//! Video submission, lookup, listing and deletion.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use vidx_models::{Caption, Job, JobPayload, NewVideo, Scene, Video, VideoId};
use vidx_store::Page;

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::metrics;
use crate::state::AppState;

pub const MAX_TAGS: usize = 32;

/// Body of `POST /api/v1/videos`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitVideoRequest {
    #[validate(length(max = 512), custom(function = "not_blank"))]
    pub filename: String,

    #[validate(length(max = 4096), custom(function = "not_blank"))]
    pub filepath: String,

    #[serde(default)]
    #[validate(length(max = 512))]
    pub title: Option<String>,

    #[serde(default)]
    #[validate(length(max = 32, message = "at most 32 tags are allowed"))]
    pub tags: Vec<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

impl From<SubmitVideoRequest> for NewVideo {
    fn from(req: SubmitVideoRequest) -> Self {
        let mut video = NewVideo::new(req.filename.trim(), req.filepath.trim()).with_tags(req.tags);
        video.title = req.title.filter(|t| !t.trim().is_empty());
        video.metadata = req.metadata;
        video
    }
}

#[derive(Serialize)]
pub struct SubmitVideoResponse {
    pub video: Video,
    pub processing_job: Job,
    pub message: String,
}

/// Create the video row and enqueue its ingestion job.
pub async fn submit_video(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubmitVideoRequest>,
) -> ApiResult<(StatusCode, Json<SubmitVideoResponse>)> {
    request.validate()?;

    let video = state.store.create_video(request.into()).await?;
    let payload = JobPayload::VideoIngestion {
        video_id: video.id,
        filename: video.filename.clone(),
        filepath: video.filepath.clone(),
    };

    let job = match state.queue.enqueue(payload).await {
        Ok(job) => job,
        Err(e) => {
            // A video without an ingestion job would never progress.
            if let Err(del) = state.store.delete_video(video.id).await {
                warn!(video_id = %video.id, "Failed to roll back video: {}", del);
            }
            return Err(e.into());
        }
    };

    metrics::record_video_submitted();
    metrics::record_job_enqueued(job.job_type.as_str());
    info!(video_id = %video.id, job_id = %job.id, "Video submitted");

    Ok((
        StatusCode::CREATED,
        Json(SubmitVideoResponse {
            message: format!("Video {} queued for processing", video.id),
            video,
            processing_job: job,
        }),
    ))
}

/// Raw listing parameters. Anything unparsable falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct ListVideosQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Serialize)]
pub struct ListVideosResponse {
    pub videos: Vec<Video>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListVideosQuery>,
) -> ApiResult<Json<ListVideosResponse>> {
    let page = Page::clamped(
        query.limit.and_then(|s| s.trim().parse().ok()),
        query.offset.and_then(|s| s.trim().parse().ok()),
    );
    let videos = state.store.list_videos(page).await?;
    let total = state.store.count_videos().await?;

    Ok(Json(ListVideosResponse {
        videos,
        total,
        limit: page.limit,
        offset: page.offset,
    }))
}

#[derive(Serialize)]
pub struct VideoDetailResponse {
    pub video: Video,
    pub scenes: Vec<Scene>,
    pub captions: Vec<Caption>,
    pub processing_jobs: Vec<Job>,
}

pub async fn get_video(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<VideoDetailResponse>> {
    let id = VideoId(id);
    let video = state.store.get_video(id).await?;
    let scenes = state.store.scenes_for_video(id).await?;
    let captions = state.store.captions_for_video(id).await?;
    let processing_jobs = state.queue.jobs_for_video(id).await?;

    Ok(Json(VideoDetailResponse {
        video,
        scenes,
        captions,
        processing_jobs,
    }))
}

#[derive(Serialize)]
pub struct DeleteVideoResponse {
    pub message: String,
    pub video_id: VideoId,
    pub cancelled_jobs: usize,
}

/// Cancel the video's pending jobs, then delete it and its scenes. Running
/// jobs find the video gone and fail on their own.
pub async fn delete_video(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<DeleteVideoResponse>> {
    let id = VideoId(id);
    state.store.get_video(id).await?;

    let cancelled = state.queue.cancel_pending_for_video(id).await?;
    state.store.delete_video(id).await?;
    info!(video_id = %id, cancelled_jobs = cancelled.len(), "Video deleted");

    Ok(Json(DeleteVideoResponse {
        message: format!("Video {} deleted", id),
        video_id: id,
        cancelled_jobs: cancelled.len(),
    }))
}
