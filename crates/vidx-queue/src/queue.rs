//! The queue contract shared by every backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vidx_models::{Job, JobId, JobPayload, JobStatus, JobType, QueueDepth, StatusUpdate, VideoId};

use crate::error::QueueResult;

/// Durable typed work queue.
///
/// Each job type has its own FIFO. A dequeued job is hidden in an in-flight
/// set until it is acknowledged; if its visibility timeout lapses first,
/// [`JobQueue::reap_expired`] puts it back at the head of its queue.
/// Workers holding a job longer than that renew it with [`JobQueue::touch`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create a pending job and append it to the tail of its type's queue.
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job>;

    /// Create a pending job that only becomes visible after `delay`.
    async fn enqueue_delayed(
        &self,
        payload: JobPayload,
        delay: Duration,
        retry_of: Option<JobId>,
        attempt: u32,
    ) -> QueueResult<Job>;

    /// Pop the head of the queue for `job_type`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn dequeue(&self, job_type: JobType, timeout: Duration) -> QueueResult<Option<Job>>;

    /// Drop a delivered job from the in-flight set.
    async fn ack(&self, job: &Job) -> QueueResult<()>;

    /// Push a delivered job's visibility deadline a full timeout past now.
    ///
    /// Returns `false` when the job is no longer in flight, e.g. it was
    /// acknowledged or already handed back to the queue.
    async fn touch(&self, job: &Job) -> QueueResult<bool>;

    /// How long a delivered job stays hidden without a [`JobQueue::touch`].
    fn visibility_timeout(&self) -> Duration;

    /// Apply a status change to a stored job and return the new record.
    async fn update_status(&self, id: &JobId, update: StatusUpdate) -> QueueResult<Job>;

    async fn get_job(&self, id: &JobId) -> QueueResult<Job>;

    /// Newest first, optionally restricted to one type.
    async fn list_jobs(&self, job_type: Option<JobType>, limit: usize) -> QueueResult<Vec<Job>>;

    /// Every job recorded for a video, oldest first.
    async fn jobs_for_video(&self, video_id: VideoId) -> QueueResult<Vec<Job>>;

    /// Cancel the video's jobs that have not been picked up yet.
    async fn cancel_pending_for_video(&self, video_id: VideoId) -> QueueResult<Vec<JobId>>;

    /// Requeue in-flight jobs whose visibility timeout has passed.
    ///
    /// A running job whose record changed within the last timeout still
    /// has a live worker; its deadline is renewed instead.
    async fn reap_expired(&self) -> QueueResult<Vec<JobId>>;

    /// Move delayed jobs whose time has come into their queues.
    async fn promote_due(&self) -> QueueResult<usize>;

    async fn queue_depths(&self) -> QueueResult<Vec<QueueDepth>>;

    async fn health(&self) -> QueueResult<()>;
}

/// Whether `job` shows a worker's activity within the last `visibility`.
pub(crate) fn recently_active(job: &Job, now: DateTime<Utc>, visibility: Duration) -> bool {
    let window =
        chrono::Duration::from_std(visibility).unwrap_or_else(|_| chrono::Duration::days(365));
    job.status == JobStatus::Running && now - job.updated_at < window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobPayload::SceneDetection {
                video_id: VideoId(1),
            },
            3,
        )
    }

    #[test]
    fn test_recently_active_needs_running_status() {
        let now = Utc::now();
        let mut job = job();
        job.updated_at = now;
        assert!(!recently_active(&job, now, Duration::from_secs(60)));

        job.apply_update(&StatusUpdate::running(10), now).unwrap();
        assert!(recently_active(&job, now, Duration::from_secs(60)));
        assert!(!recently_active(
            &job,
            now + chrono::Duration::seconds(61),
            Duration::from_secs(60)
        ));
    }
}
