//! In-process queue with the same delivery semantics as the Redis backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use vidx_models::{
    Job, JobId, JobPayload, JobStatus, JobType, QueueDepth, StatusUpdate, VideoId,
};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{recently_active, JobQueue};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Creation order
    order: Vec<JobId>,
    pending: HashMap<JobType, VecDeque<JobId>>,
    /// Visibility deadline per delivered id
    inflight: HashMap<JobType, HashMap<JobId, DateTime<Utc>>>,
    delayed: Vec<(DateTime<Utc>, JobId)>,
}

impl State {
    fn release(&mut self, job_type: JobType, id: &JobId) {
        if let Some(set) = self.inflight.get_mut(&job_type) {
            set.remove(id);
        }
    }
}

/// Job queue held in memory.
pub struct MemoryJobQueue {
    state: Mutex<State>,
    notify: Notify,
    config: QueueConfig,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl MemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, job: Job) -> QueueResult<Job> {
        {
            let mut state = self.lock();
            if state.jobs.contains_key(&job.id) {
                return Err(QueueError::DuplicateJobId(job.id.to_string()));
            }
            state.jobs.insert(job.id.clone(), job.clone());
            state.order.push(job.id.clone());
            match job.not_before.filter(|at| *at > Utc::now()) {
                Some(at) => state.delayed.push((at, job.id.clone())),
                None => state
                    .pending
                    .entry(job.job_type)
                    .or_default()
                    .push_back(job.id.clone()),
            }
        }
        self.notify.notify_waiters();
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            video_id = %job.video_id(),
            attempt = job.attempt,
            "Enqueued job"
        );
        Ok(job)
    }

    fn deadline_from(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + chrono::Duration::from_std(self.config.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600))
    }

    /// Pop the next deliverable job without waiting.
    fn try_pop(&self, job_type: JobType) -> Option<Job> {
        let mut state = self.lock();
        let deadline = self.deadline_from(Utc::now());

        while let Some(id) = state.pending.get_mut(&job_type).and_then(|q| q.pop_front()) {
            match state.jobs.get(&id).cloned() {
                Some(job) if !job.status.is_terminal() => {
                    state
                        .inflight
                        .entry(job_type)
                        .or_default()
                        .insert(id, deadline);
                    return Some(job);
                }
                Some(job) => debug!(job_id = %id, status = %job.status, "Skipping finished job"),
                None => warn!(job_id = %id, "Dropping queue entry without a job record"),
            }
        }
        None
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job> {
        payload.validate().map_err(QueueError::invalid_payload)?;
        self.insert(Job::new(payload, self.config.max_attempts))
    }

    async fn enqueue_delayed(
        &self,
        payload: JobPayload,
        delay: Duration,
        retry_of: Option<JobId>,
        attempt: u32,
    ) -> QueueResult<Job> {
        payload.validate().map_err(QueueError::invalid_payload)?;
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| QueueError::invalid_payload(format!("delay out of range: {}", e)))?;
        let mut job = Job::new(payload, self.config.max_attempts)
            .with_attempt(attempt)
            .with_not_before(Utc::now() + delay);
        job.retry_of = retry_of;
        self.insert(job)
    }

    async fn dequeue(&self, job_type: JobType, timeout: Duration) -> QueueResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.try_pop(job_type) {
                debug!(job_id = %job.id, job_type = %job_type, "Dequeued job");
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        self.lock().release(job.job_type, &job.id);
        Ok(())
    }

    async fn touch(&self, job: &Job) -> QueueResult<bool> {
        let deadline = self.deadline_from(Utc::now());
        let mut state = self.lock();
        match state
            .inflight
            .get_mut(&job.job_type)
            .and_then(|set| set.get_mut(&job.id))
        {
            Some(at) => {
                *at = deadline;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn update_status(&self, id: &JobId, update: StatusUpdate) -> QueueResult<Job> {
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::not_found(id.as_str()))?;
        job.apply_update(&update, Utc::now())?;
        Ok(job.clone())
    }

    async fn get_job(&self, id: &JobId) -> QueueResult<Job> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::not_found(id.as_str()))
    }

    async fn list_jobs(&self, job_type: Option<JobType>, limit: usize) -> QueueResult<Vec<Job>> {
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job_type.map_or(true, |t| job.job_type == t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn jobs_for_video(&self, video_id: VideoId) -> QueueResult<Vec<Job>> {
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.video_id() == video_id)
            .cloned()
            .collect())
    }

    async fn cancel_pending_for_video(&self, video_id: VideoId) -> QueueResult<Vec<JobId>> {
        let mut state = self.lock();
        let now = Utc::now();
        let targets: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.video_id() == video_id && j.status == JobStatus::Pending)
            .map(|j| j.id.clone())
            .collect();

        for id in &targets {
            if let Some(job) = state.jobs.get_mut(id) {
                job.apply_update(&StatusUpdate::cancelled(), now)?;
            }
            for queue in state.pending.values_mut() {
                queue.retain(|q| q != id);
            }
            state.delayed.retain(|(_, d)| d != id);
        }
        Ok(targets)
    }

    async fn reap_expired(&self) -> QueueResult<Vec<JobId>> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut requeued = Vec::new();

        for job_type in JobType::ALL {
            let expired: Vec<JobId> = state
                .inflight
                .get(&job_type)
                .map(|set| {
                    set.iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(id, _)| id.clone())
                        .collect()
                })
                .unwrap_or_default();

            for id in expired {
                let renewed = state
                    .jobs
                    .get(&id)
                    .filter(|job| recently_active(job, now, self.config.visibility_timeout))
                    .map(|job| self.deadline_from(job.updated_at));
                if let Some(renewed) = renewed {
                    if let Some(at) = state
                        .inflight
                        .get_mut(&job_type)
                        .and_then(|set| set.get_mut(&id))
                    {
                        *at = renewed;
                    }
                    debug!(job_id = %id, "Job still running, renewed visibility");
                    continue;
                }
                state.release(job_type, &id);
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if job.apply_update(&StatusUpdate::requeued(), now).is_err() {
                    continue;
                }
                warn!(job_id = %id, job_type = %job_type, "Visibility timeout expired, requeued job");
                state
                    .pending
                    .entry(job_type)
                    .or_default()
                    .push_front(id.clone());
                requeued.push(id);
            }
        }

        drop(state);
        if !requeued.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let mut state = self.lock();
        let now = Utc::now();
        let (due, later): (Vec<_>, Vec<_>) = state
            .delayed
            .drain(..)
            .partition(|(at, _)| *at <= now);
        state.delayed = later;

        let mut promoted = 0;
        for (_, id) in due {
            let Some(job_type) = state.jobs.get(&id).map(|j| j.job_type) else {
                continue;
            };
            state.pending.entry(job_type).or_default().push_back(id);
            promoted += 1;
        }

        drop(state);
        if promoted > 0 {
            self.notify.notify_waiters();
        }
        Ok(promoted)
    }

    async fn queue_depths(&self) -> QueueResult<Vec<QueueDepth>> {
        let state = self.lock();
        Ok(JobType::ALL
            .iter()
            .map(|t| QueueDepth {
                job_type: *t,
                pending: state.pending.get(t).map_or(0, |q| q.len() as u64),
                processing: state.inflight.get(t).map_or(0, |s| s.len() as u64),
            })
            .collect())
    }

    async fn health(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_payload(video_id: i64) -> JobPayload {
        JobPayload::SceneDetection {
            video_id: VideoId(video_id),
        }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo_per_type() {
        let queue = MemoryJobQueue::default();
        let a = queue.enqueue(scene_payload(1)).await.unwrap();
        let b = queue.enqueue(scene_payload(2)).await.unwrap();
        queue
            .enqueue(JobPayload::CaptionExtraction { video_id: VideoId(3) })
            .await
            .unwrap();

        assert_eq!(a.status, JobStatus::Pending);
        let first = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let second = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(second.id, b.id);
        assert!(queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryJobQueue::default());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .dequeue(JobType::SceneDetection, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = queue.enqueue(scene_payload(1)).await.unwrap();
        let got = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(got.id, job.id);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_get_distinct_jobs() {
        let queue = std::sync::Arc::new(MemoryJobQueue::default());
        for i in 1..=20 {
            queue.enqueue(scene_payload(i)).await.unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = queue
                    .dequeue(JobType::SceneDetection, Duration::from_millis(10))
                    .await
                    .unwrap()
                {
                    got.push(job.id);
                }
                got
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_not_found() {
        let queue = MemoryJobQueue::default();
        let err = queue
            .update_status(&JobId::from_string("job_missing"), StatusUpdate::running(5))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_terminal_status_is_kept() {
        let queue = MemoryJobQueue::default();
        let job = queue.enqueue(scene_payload(1)).await.unwrap();
        queue.update_status(&job.id, StatusUpdate::running(40)).await.unwrap();
        queue.update_status(&job.id, StatusUpdate::completed()).await.unwrap();
        let err = queue
            .update_status(&job.id, StatusUpdate::failed("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition(_)));

        let stored = queue.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_expired_job_is_redelivered_at_head() {
        let queue = MemoryJobQueue::new(
            QueueConfig::default().with_visibility_timeout(Duration::from_millis(5)),
        );
        let first = queue.enqueue(scene_payload(1)).await.unwrap();
        let second = queue.enqueue(scene_payload(2)).await.unwrap();

        let delivered = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.update_status(&delivered.id, StatusUpdate::running(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let requeued = queue.reap_expired().await.unwrap();
        assert_eq!(requeued, vec![first.id.clone()]);
        assert_eq!(queue.get_job(&first.id).await.unwrap().status, JobStatus::Pending);

        let again = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, first.id);
        let next = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, second.id);
    }

    #[tokio::test]
    async fn test_touch_keeps_job_in_flight() {
        let queue = MemoryJobQueue::new(
            QueueConfig::default().with_visibility_timeout(Duration::from_millis(30)),
        );
        queue.enqueue(scene_payload(1)).await.unwrap();
        let job = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert!(queue.touch(&job).await.unwrap());
            assert!(queue.reap_expired().await.unwrap().is_empty());
        }
        assert_eq!(queue.get_job(&job.id).await.unwrap().status, JobStatus::Pending);

        queue.ack(&job).await.unwrap();
        assert!(!queue.touch(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_running_job_is_not_reaped() {
        let queue = MemoryJobQueue::new(
            QueueConfig::default().with_visibility_timeout(Duration::from_millis(40)),
        );
        queue.enqueue(scene_payload(1)).await.unwrap();
        let job = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.update_status(&job.id, StatusUpdate::running(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The delivery deadline has passed but the progress write has not aged out.
        assert!(queue.reap_expired().await.unwrap().is_empty());
        assert_eq!(queue.get_job(&job.id).await.unwrap().status, JobStatus::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.reap_expired().await.unwrap(), vec![job.id.clone()]);
        assert_eq!(queue.get_job(&job.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_acked_job_is_not_reaped() {
        let queue = MemoryJobQueue::new(
            QueueConfig::default().with_visibility_timeout(Duration::from_millis(5)),
        );
        queue.enqueue(scene_payload(1)).await.unwrap();
        let job = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.update_status(&job.id, StatusUpdate::completed()).await.unwrap();
        queue.ack(&job).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.reap_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_promotion() {
        let queue = MemoryJobQueue::default();
        let original = queue.enqueue(scene_payload(1)).await.unwrap();
        let retry = queue
            .enqueue_delayed(
                scene_payload(1),
                Duration::from_millis(20),
                Some(original.id.clone()),
                2,
            )
            .await
            .unwrap();
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of, Some(original.id.clone()));

        // Only the original is visible now.
        queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.promote_due().await.unwrap(), 0);
        assert!(queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(5))
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.promote_due().await.unwrap(), 1);
        let got = queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, retry.id);
    }

    #[tokio::test]
    async fn test_cancel_pending_for_video_skips_running() {
        let queue = MemoryJobQueue::default();
        let running = queue.enqueue(scene_payload(1)).await.unwrap();
        queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(5))
            .await
            .unwrap();
        queue.update_status(&running.id, StatusUpdate::running(1)).await.unwrap();
        let pending = queue
            .enqueue(JobPayload::CaptionExtraction { video_id: VideoId(1) })
            .await
            .unwrap();
        let other = queue.enqueue(scene_payload(2)).await.unwrap();

        let cancelled = queue.cancel_pending_for_video(VideoId(1)).await.unwrap();
        assert_eq!(cancelled, vec![pending.id.clone()]);
        assert_eq!(queue.get_job(&running.id).await.unwrap().status, JobStatus::Running);
        assert_eq!(queue.get_job(&other.id).await.unwrap().status, JobStatus::Pending);
        assert!(queue
            .dequeue(JobType::CaptionExtraction, Duration::from_millis(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first_with_filter() {
        let queue = MemoryJobQueue::default();
        let a = queue.enqueue(scene_payload(1)).await.unwrap();
        let b = queue
            .enqueue(JobPayload::CaptionExtraction { video_id: VideoId(1) })
            .await
            .unwrap();
        let c = queue.enqueue(scene_payload(2)).await.unwrap();

        let all = queue.list_jobs(None, 10).await.unwrap();
        let ids: Vec<_> = all.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let scenes = queue.list_jobs(Some(JobType::SceneDetection), 1).await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].id, c.id);

        let for_video = queue.jobs_for_video(VideoId(1)).await.unwrap();
        assert_eq!(for_video.len(), 2);
        assert_eq!(for_video[0].id, a.id);
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected() {
        let queue = MemoryJobQueue::default();
        let err = queue.enqueue(scene_payload(0)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_queue_depths() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(scene_payload(1)).await.unwrap();
        queue.enqueue(scene_payload(2)).await.unwrap();
        queue
            .dequeue(JobType::SceneDetection, Duration::from_millis(5))
            .await
            .unwrap();
        let depths = queue.queue_depths().await.unwrap();
        let scene = depths
            .iter()
            .find(|d| d.job_type == JobType::SceneDetection)
            .unwrap();
        assert_eq!(scene.pending, 1);
        assert_eq!(scene.processing, 1);
    }
}
