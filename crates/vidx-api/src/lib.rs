//! Axum HTTP API for the ingestion engine.
//!
//! This crate provides:
//! - Video submission, listing, lookup and deletion
//! - Semantic and text search over indexed scenes
//! - Job inspection, manual enqueue and cancellation
//! - Per-IP rate limiting, request ids and Prometheus metrics

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
