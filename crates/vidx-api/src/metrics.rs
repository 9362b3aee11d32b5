//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vidx_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vidx_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vidx_http_requests_in_flight";

    // Pipeline metrics
    pub const VIDEOS_SUBMITTED_TOTAL: &str = "vidx_videos_submitted_total";
    pub const JOBS_ENQUEUED_TOTAL: &str = "vidx_jobs_enqueued_total";

    // Search metrics
    pub const SEARCHES_TOTAL: &str = "vidx_searches_total";
    pub const SEARCH_DURATION_SECONDS: &str = "vidx_search_duration_seconds";
    pub const SEARCH_RESULTS: &str = "vidx_search_results";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vidx_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_video_submitted() {
    counter!(names::VIDEOS_SUBMITTED_TOTAL).increment(1);
}

/// Record job enqueued.
pub fn record_job_enqueued(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

/// Record a finished search.
pub fn record_search(mode: &str, duration_secs: f64, results: usize) {
    let labels = [("mode", mode.to_string())];
    counter!(names::SEARCHES_TOTAL, &labels).increment(1);
    histogram!(names::SEARCH_DURATION_SECONDS, &labels).record(duration_secs);
    histogram!(names::SEARCH_RESULTS, &labels).record(results as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace id segments so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_id_segment(segment) { ":id" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Numeric video ids and `job_<hex>` job ids.
fn is_id_segment(segment: &str) -> bool {
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    segment
        .strip_prefix("job_")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    // Increment in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    // Decrement in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
