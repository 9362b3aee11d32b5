//! Stage workers for the ingestion pipeline.
//!
//! This crate provides:
//! - Per-type consumer loops with graceful shutdown
//! - The four stage handlers (ingestion, scenes, captions, embeddings)
//! - Retry scheduling with exponential backoff
//! - A reaper for expired in-flight jobs and due delayed jobs

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod stages;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use logging::JobLogger;
pub use retry::RetryPolicy;
pub use stages::StageContext;
