//! Worker configuration.

use std::time::Duration;

use vidx_models::JobType;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer loops per job type
    pub ingestion_concurrency: usize,
    pub scene_concurrency: usize,
    pub caption_concurrency: usize,
    pub embedding_concurrency: usize,
    /// How long one dequeue call blocks before re-checking for shutdown
    pub dequeue_timeout: Duration,
    /// Hard limit on a single stage run
    pub stage_timeout: Duration,
    /// How often expired in-flight jobs are reaped and delayed jobs promoted
    pub reaper_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Scenes embedded per backend call
    pub embed_batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ingestion_concurrency: 2,
            scene_concurrency: 1,
            caption_concurrency: 2,
            embedding_concurrency: 1,
            dequeue_timeout: Duration::from_secs(5),
            stage_timeout: Duration::from_secs(3600), // 1 hour
            reaper_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            embed_batch_size: 16,
        }
    }
}

/// Floor for the lease renewal interval.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// How often a running job renews its queue lease: three times per
/// visibility timeout, so one missed renewal does not cost the lease.
pub fn heartbeat_interval(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / 3).max(MIN_HEARTBEAT)
}

fn usize_from_env(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|v: &u64| *v > 0)
            .unwrap_or(default),
    )
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            ingestion_concurrency: usize_from_env("WORKER_INGESTION_CONCURRENCY", 2),
            scene_concurrency: usize_from_env("WORKER_SCENE_CONCURRENCY", 1),
            caption_concurrency: usize_from_env("WORKER_CAPTION_CONCURRENCY", 2),
            embedding_concurrency: usize_from_env("WORKER_EMBEDDING_CONCURRENCY", 1),
            dequeue_timeout: secs_from_env("WORKER_DEQUEUE_TIMEOUT_SECS", 5),
            stage_timeout: secs_from_env("WORKER_STAGE_TIMEOUT_SECS", 3600),
            reaper_interval: secs_from_env("WORKER_REAPER_INTERVAL_SECS", 30),
            shutdown_timeout: secs_from_env("WORKER_SHUTDOWN_TIMEOUT_SECS", 30),
            embed_batch_size: usize_from_env("WORKER_EMBED_BATCH_SIZE", 16).max(1),
        }
    }

    /// Number of consumer loops for a job type. Zero disables the type.
    pub fn concurrency_for(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::VideoIngestion => self.ingestion_concurrency,
            JobType::SceneDetection => self.scene_concurrency,
            JobType::CaptionExtraction => self.caption_concurrency,
            JobType::EmbeddingGeneration => self.embedding_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_for() {
        let config = WorkerConfig {
            caption_concurrency: 7,
            ..Default::default()
        };
        assert_eq!(config.concurrency_for(JobType::CaptionExtraction), 7);
        assert_eq!(config.concurrency_for(JobType::VideoIngestion), 2);
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(
            heartbeat_interval(Duration::from_secs(600)),
            Duration::from_secs(200)
        );
        assert_eq!(
            heartbeat_interval(Duration::from_millis(50)),
            Duration::from_nanos(16_666_666)
        );
        assert_eq!(heartbeat_interval(Duration::ZERO), MIN_HEARTBEAT);
    }
}
