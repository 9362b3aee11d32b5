//! Health check handler.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use vidx_models::{MediaStats, QueueDepth};

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when a dependency check fails
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<MediaStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<QueueDepth>,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckStatus,
    pub queue: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Liveness plus dependency health and corpus totals. Always 200; a failing
/// dependency shows up as `degraded`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = {
        let start = Instant::now();
        match state.store.health().await {
            Ok(()) => CheckStatus::ok(start.elapsed().as_millis() as u64),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let queue = {
        let start = Instant::now();
        match state.queue.health().await {
            Ok(()) => CheckStatus::ok(start.elapsed().as_millis() as u64),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let stats = if database.is_ok() {
        state.store.stats().await.ok()
    } else {
        None
    };
    let queues = if queue.is_ok() {
        state.queue.queue_depths().await.unwrap_or_default()
    } else {
        Vec::new()
    };

    let all_ok = database.is_ok() && queue.is_ok();

    Json(HealthResponse {
        status: if all_ok { "healthy" } else { "degraded" }.to_string(),
        service: "vidx-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks: HealthChecks { database, queue },
        stats,
        queues,
    })
}
