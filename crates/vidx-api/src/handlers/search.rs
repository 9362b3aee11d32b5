//! Semantic and text search.

use axum::extract::State;
use axum::Json;
use tracing::debug;

use vidx_models::{SearchRequest, SearchResponse};

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::metrics;
use crate::state::AppState;

pub async fn semantic_search(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let response = state.search.semantic(&request).await?;
    record("semantic", &response);
    Ok(Json(response))
}

pub async fn text_search(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let response = state.search.text(&request).await?;
    record("text", &response);
    Ok(Json(response))
}

fn record(mode: &str, response: &SearchResponse) {
    debug!(
        mode,
        query = %response.query,
        results = response.results.len(),
        search_time_ms = response.search_time_ms,
        "Search finished"
    );
    metrics::record_search(
        mode,
        response.search_time_ms as f64 / 1000.0,
        response.results.len(),
    );
}
