//! Queue configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the queue owns
    pub prefix: String,
    /// How long a dequeued job stays hidden before it is redelivered
    pub visibility_timeout: Duration,
    /// Attempts per unit of work, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound on retry delay
    pub backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "vidx".to_string(),
            visibility_timeout: Duration::from_secs(600), // 10 minutes
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    ///
    /// `REDIS_URL` wins; otherwise the URL is assembled from `REDIS_ADDR`,
    /// `REDIS_PASSWORD` and `REDIS_DB`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| {
                redis_url_from_parts(
                    &std::env::var("REDIS_ADDR").unwrap_or_else(|_| "localhost:6379".to_string()),
                    std::env::var("REDIS_PASSWORD").ok().as_deref(),
                    std::env::var("REDIS_DB")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                )
            }),
            prefix: std::env::var("QUEUE_PREFIX")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.prefix),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|v: &u64| *v > 0)
                    .unwrap_or(600),
            ),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &u32| *v > 0)
                .unwrap_or(defaults.max_attempts),
            backoff_base: Duration::from_secs(
                std::env::var("QUEUE_BACKOFF_BASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            backoff_max: Duration::from_secs(
                std::env::var("QUEUE_BACKOFF_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

fn redis_url_from_parts(addr: &str, password: Option<&str>, db: u32) -> String {
    match password.filter(|p| !p.is_empty()) {
        Some(pw) => format!("redis://:{}@{}/{}", pw, addr, db),
        None => format!("redis://{}/{}", addr, db),
    }
}
