//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use vidx_models::JobType;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vidx_worker_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vidx_worker_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "vidx_worker_jobs_retried_total";
    pub const STAGE_DURATION_SECONDS: &str = "vidx_worker_stage_duration_seconds";
    pub const JOBS_REAPED_TOTAL: &str = "vidx_worker_jobs_reaped_total";
}

/// Serve `/metrics` on `addr` from a background listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_job_completed(job_type: JobType, duration_secs: f64) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(job_type: JobType, retryable: bool) {
    let labels = [
        ("type", job_type.as_str().to_string()),
        ("retryable", retryable.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(job_type: JobType) {
    let labels = [("type", job_type.as_str().to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_jobs_reaped(count: usize) {
    counter!(names::JOBS_REAPED_TOTAL).increment(count as u64);
}
