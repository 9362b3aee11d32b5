//! Aggregate statistics.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vidx_models::{MediaStats, QueueDepth};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub media: MediaStats,
    pub queues: Vec<QueueDepth>,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let media = state.store.stats().await?;
    let queues = state.queue.queue_depths().await?;
    Ok(Json(StatsResponse { media, queues }))
}
