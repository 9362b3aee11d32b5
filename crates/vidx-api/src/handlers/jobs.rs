//! Job listing, lookup, manual enqueue and cancellation.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vidx_models::{Job, JobId, JobPayload, JobStatus, JobType, StatusUpdate};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath};
use crate::metrics;
use crate::state::AppState;

pub const DEFAULT_JOB_LIMIT: usize = 20;
pub const MAX_JOB_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<String>,
}

#[derive(Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

/// Newest first, optionally restricted to one stage.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let job_type = match query.job_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(s.parse::<JobType>().map_err(ApiError::bad_request)?),
    };
    let limit = match query.limit.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(l) if l > 0 => (l as usize).min(MAX_JOB_LIMIT),
        _ => DEFAULT_JOB_LIMIT,
    };

    let jobs = state.queue.list_jobs(job_type, limit).await?;
    Ok(Json(ListJobsResponse {
        count: jobs.len(),
        jobs,
    }))
}

pub async fn get_job(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Job>> {
    let job = state.queue.get_job(&JobId::from_string(id)).await?;
    Ok(Json(job))
}

/// Enqueue a typed payload by hand. Later stages require a completed job of
/// the preceding stage for the same video.
pub async fn create_job(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<JobPayload>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    payload.validate().map_err(ApiError::bad_request)?;

    let video_id = payload.video_id();
    let video = state.store.get_video(video_id).await?;

    let job_type = payload.job_type();
    if let Some(previous) = job_type.previous() {
        let jobs = state.queue.jobs_for_video(video_id).await?;
        let ready = jobs
            .iter()
            .any(|j| j.job_type == previous && j.status == JobStatus::Completed);
        if !ready {
            return Err(ApiError::conflict(format!(
                "video {} has no completed {} job",
                video_id,
                previous.as_str()
            )));
        }
    }

    // The video row is the source of truth for the file location.
    let payload = match payload {
        JobPayload::VideoIngestion { video_id, .. } => JobPayload::VideoIngestion {
            video_id,
            filename: video.filename,
            filepath: video.filepath,
        },
        other => other,
    };

    let job = state.queue.enqueue(payload).await?;
    metrics::record_job_enqueued(job.job_type.as_str());
    info!(job_id = %job.id, video_id = %video_id, "Enqueued {} by request", job_type);

    Ok((StatusCode::CREATED, Json(job)))
}

/// Administrative cancel of a job that has not finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(id);
    let job = state.queue.get_job(&id).await?;
    if job.status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "job {} is already {}",
            id, job.status
        )));
    }

    let job = state.queue.update_status(&id, StatusUpdate::cancelled()).await?;
    info!(job_id = %job.id, "Job cancelled");
    Ok(Json(job))
}
