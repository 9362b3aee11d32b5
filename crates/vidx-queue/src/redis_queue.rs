//! Job queue on Redis lists.
//!
//! Key layout, all under the configured prefix:
//! - `queue:{type}`: pending job ids, pushed at the tail and popped from the head
//! - `processing:{type}`: ids handed to a worker and not yet acknowledged
//! - `inflight:{type}`: sorted set of visibility deadlines (ms) for those ids
//! - `delayed`: sorted set of not-before times (ms) for backoff jobs
//! - `job:{id}`: hash whose `data` field holds the job record as JSON
//! - `jobs:{type}`, `jobs:all`: creation-time indexes
//! - `video_jobs:{video_id}`: creation-time index per video

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use vidx_models::{
    Job, JobId, JobPayload, JobStatus, JobType, QueueDepth, StatusUpdate, VideoId,
};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{recently_active, JobQueue};

/// Attempts at the compare-and-set in `update_status` before giving up.
const CAS_RETRIES: usize = 5;

/// Upper bound of ids handled per reaper or promotion pass.
const SWEEP_BATCH: usize = 100;

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], 'data', ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[2])
if ARGV[4] == 'delayed' then
    redis.call('ZADD', KEYS[5], ARGV[5], ARGV[2])
else
    redis.call('RPUSH', KEYS[5], ARGV[2])
end
return 1
"#;

const CAS_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'data') == ARGV[1] then
    redis.call('HSET', KEYS[1], 'data', ARGV[2])
    return 1
end
return 0
"#;

const REQUEUE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('LREM', KEYS[2], 0, ARGV[1])
    redis.call('LPUSH', KEYS[3], ARGV[1])
    return 1
end
return 0
"#;

const TOUCH_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

struct Keys<'a> {
    prefix: &'a str,
}

impl Keys<'_> {
    fn queue(&self, t: JobType) -> String {
        format!("{}:queue:{}", self.prefix, t.as_str())
    }

    fn processing(&self, t: JobType) -> String {
        format!("{}:processing:{}", self.prefix, t.as_str())
    }

    fn inflight(&self, t: JobType) -> String {
        format!("{}:inflight:{}", self.prefix, t.as_str())
    }

    fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn by_type(&self, t: JobType) -> String {
        format!("{}:jobs:{}", self.prefix, t.as_str())
    }

    fn all(&self) -> String {
        format!("{}:jobs:all", self.prefix)
    }

    fn by_video(&self, video_id: VideoId) -> String {
        format!("{}:video_jobs:{}", self.prefix, video_id)
    }
}

/// Redis-backed job queue.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn keys(&self) -> Keys<'_> {
        Keys {
            prefix: &self.config.prefix,
        }
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    async fn load_raw(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
    ) -> QueueResult<Option<String>> {
        let raw: Option<String> = conn.hget(self.keys().job(id), "data").await?;
        Ok(raw)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &str) -> QueueResult<Option<Job>> {
        match self.load_raw(conn, id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load_many(
        &self,
        conn: &mut MultiplexedConnection,
        ids: &[String],
    ) -> QueueResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.keys();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGET").arg(keys.job(id)).arg("data");
        }
        let raws: Vec<Option<String>> = pipe.query_async(conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            match serde_json::from_str::<Job>(&raw) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job record: {}", e),
            }
        }
        Ok(jobs)
    }

    async fn insert(&self, job: Job) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let data = serde_json::to_string(&job)?;
        let created_ms = job.created_at.timestamp_millis();

        let delayed = job.not_before.filter(|at| *at > Utc::now());
        let (mode, target, score) = match delayed {
            Some(at) => ("delayed", keys.delayed(), at.timestamp_millis()),
            None => ("ready", keys.queue(job.job_type), 0),
        };

        let inserted: i64 = Script::new(ENQUEUE_SCRIPT)
            .key(keys.job(job.id.as_str()))
            .key(keys.by_type(job.job_type))
            .key(keys.all())
            .key(keys.by_video(job.video_id()))
            .key(target)
            .arg(&data)
            .arg(job.id.as_str())
            .arg(created_ms)
            .arg(mode)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(QueueError::DuplicateJobId(job.id.to_string()));
        }

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            video_id = %job.video_id(),
            attempt = job.attempt,
            delayed = delayed.is_some(),
            "Enqueued job"
        );
        Ok(job)
    }

    fn visibility_ms(&self) -> i64 {
        self.config.visibility_timeout.as_millis() as i64
    }

    /// Remove a job id from a type's processing list and in-flight set.
    async fn release(
        &self,
        conn: &mut MultiplexedConnection,
        job_type: JobType,
        id: &str,
    ) -> QueueResult<()> {
        let keys = self.keys();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(keys.processing(job_type))
            .arg(0)
            .arg(id)
            .ignore()
            .cmd("ZREM")
            .arg(keys.inflight(job_type))
            .arg(id)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job> {
        payload.validate().map_err(QueueError::invalid_payload)?;
        self.insert(Job::new(payload, self.config.max_attempts)).await
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
        self.insert(job).await
    }

    async fn dequeue(&self, job_type: JobType, timeout: Duration) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let id: Option<String> = if remaining < Duration::from_millis(10) {
                redis::cmd("LMOVE")
                    .arg(keys.queue(job_type))
                    .arg(keys.processing(job_type))
                    .arg("LEFT")
                    .arg("RIGHT")
                    .query_async(&mut conn)
                    .await?
            } else {
                redis::cmd("BLMOVE")
                    .arg(keys.queue(job_type))
                    .arg(keys.processing(job_type))
                    .arg("LEFT")
                    .arg("RIGHT")
                    .arg(remaining.as_secs_f64())
                    .query_async(&mut conn)
                    .await?
            };

            let Some(id) = id else {
                return Ok(None);
            };

            let visible_at = Utc::now().timestamp_millis() + self.visibility_ms();
            conn.zadd::<_, _, _, ()>(keys.inflight(job_type), &id, visible_at)
                .await?;

            match self.load(&mut conn, &id).await? {
                Some(job) if job.status.is_terminal() => {
                    debug!(job_id = %id, status = %job.status, "Skipping finished job");
                    self.release(&mut conn, job_type, &id).await?;
                }
                Some(job) => {
                    debug!(job_id = %id, job_type = %job_type, "Dequeued job");
                    return Ok(Some(job));
                }
                None => {
                    warn!(job_id = %id, "Dropping queue entry without a job record");
                    self.release(&mut conn, job_type, &id).await?;
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.release(&mut conn, job.job_type, job.id.as_str()).await?;
        debug!(job_id = %job.id, "Acknowledged job");
        Ok(())
    }

    async fn touch(&self, job: &Job) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let touched: i64 = Script::new(TOUCH_SCRIPT)
            .key(self.keys().inflight(job.job_type))
            .arg(job.id.as_str())
            .arg(Utc::now().timestamp_millis() + self.visibility_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(touched == 1)
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn update_status(&self, id: &JobId, update: StatusUpdate) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        let key = self.keys().job(id.as_str());
        let script = Script::new(CAS_SCRIPT);

        for _ in 0..CAS_RETRIES {
            let raw = self
                .load_raw(&mut conn, id.as_str())
                .await?
                .ok_or_else(|| QueueError::not_found(id.as_str()))?;
            let mut job: Job = serde_json::from_str(&raw)?;
            job.apply_update(&update, Utc::now())?;
            let next = serde_json::to_string(&job)?;

            let swapped: i64 = script
                .key(&key)
                .arg(&raw)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                debug!(job_id = %id, status = %job.status, progress = job.progress, "Updated job");
                return Ok(job);
            }
        }

        Err(QueueError::Conflict(id.to_string()))
    }

    async fn get_job(&self, id: &JobId) -> QueueResult<Job> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id.as_str())
            .await?
            .ok_or_else(|| QueueError::not_found(id.as_str()))
    }

    async fn list_jobs(&self, job_type: Option<JobType>, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let index = match job_type {
            Some(t) => keys.by_type(t),
            None => keys.all(),
        };
        let ids: Vec<String> = conn.zrevrange(index, 0, limit as isize - 1).await?;
        self.load_many(&mut conn, &ids).await
    }

    async fn jobs_for_video(&self, video_id: VideoId) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(self.keys().by_video(video_id), 0, -1).await?;
        self.load_many(&mut conn, &ids).await
    }

    async fn cancel_pending_for_video(&self, video_id: VideoId) -> QueueResult<Vec<JobId>> {
        let jobs = self.jobs_for_video(video_id).await?;
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let mut cancelled = Vec::new();

        for job in jobs.into_iter().filter(|j| j.status == JobStatus::Pending) {
            match self.update_status(&job.id, StatusUpdate::cancelled()).await {
                Ok(_) => {}
                Err(QueueError::InvalidTransition(_)) => continue,
                Err(e) => return Err(e),
            }
            redis::pipe()
                .cmd("LREM")
                .arg(keys.queue(job.job_type))
                .arg(0)
                .arg(job.id.as_str())
                .ignore()
                .cmd("ZREM")
                .arg(keys.delayed())
                .arg(job.id.as_str())
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            cancelled.push(job.id);
        }

        if !cancelled.is_empty() {
            info!(video_id = %video_id, count = cancelled.len(), "Cancelled pending jobs");
        }
        Ok(cancelled)
    }

    async fn reap_expired(&self) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let script = Script::new(REQUEUE_SCRIPT);
        let now = Utc::now().timestamp_millis();
        let mut requeued = Vec::new();

        for job_type in JobType::ALL {
            // Entries popped by a worker that died before recording a deadline.
            let processing: Vec<String> = conn.lrange(keys.processing(job_type), 0, -1).await?;
            for id in &processing {
                redis::cmd("ZADD")
                    .arg(keys.inflight(job_type))
                    .arg("NX")
                    .arg(now + self.visibility_ms())
                    .arg(id)
                    .query_async::<()>(&mut conn)
                    .await?;
            }

            let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(keys.inflight(job_type))
                .arg("-inf")
                .arg(now)
                .arg("LIMIT")
                .arg(0)
                .arg(SWEEP_BATCH)
                .query_async(&mut conn)
                .await?;

            for id in expired {
                if let Some(job) = self.load(&mut conn, &id).await? {
                    if recently_active(&job, Utc::now(), self.config.visibility_timeout) {
                        let renewed = job.updated_at.timestamp_millis() + self.visibility_ms();
                        let _: i64 = Script::new(TOUCH_SCRIPT)
                            .key(keys.inflight(job_type))
                            .arg(&id)
                            .arg(renewed)
                            .invoke_async(&mut conn)
                            .await?;
                        debug!(job_id = %id, "Job still running, renewed visibility");
                        continue;
                    }
                }

                let job_id = JobId::from_string(id.clone());
                match self.update_status(&job_id, StatusUpdate::requeued()).await {
                    Ok(_) => {}
                    Err(QueueError::InvalidTransition(_)) | Err(QueueError::JobNotFound(_)) => {
                        self.release(&mut conn, job_type, &id).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                let moved: i64 = script
                    .key(keys.inflight(job_type))
                    .key(keys.processing(job_type))
                    .key(keys.queue(job_type))
                    .arg(&id)
                    .invoke_async(&mut conn)
                    .await?;
                if moved == 1 {
                    warn!(job_id = %id, job_type = %job_type, "Visibility timeout expired, requeued job");
                    requeued.push(job_id);
                }
            }
        }

        Ok(requeued)
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let script = Script::new(PROMOTE_SCRIPT);

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys.delayed())
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(SWEEP_BATCH)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for id in due {
            let Some(job) = self.load(&mut conn, &id).await? else {
                conn.zrem::<_, _, ()>(keys.delayed(), &id).await?;
                continue;
            };
            let moved: i64 = script
                .key(keys.delayed())
                .key(keys.queue(job.job_type))
                .arg(&id)
                .invoke_async(&mut conn)
                .await?;
            if moved == 1 {
                debug!(job_id = %id, job_type = %job.job_type, "Promoted delayed job");
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn queue_depths(&self) -> QueueResult<Vec<QueueDepth>> {
        let mut conn = self.conn().await?;
        let keys = self.keys();
        let mut depths = Vec::with_capacity(JobType::ALL.len());
        for job_type in JobType::ALL {
            let pending: u64 = conn.llen(keys.queue(job_type)).await?;
            let processing: u64 = conn.llen(keys.processing(job_type)).await?;
            depths.push(QueueDepth {
                job_type,
                pending,
                processing,
            });
        }
        Ok(depths)
    }

    async fn health(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys { prefix: "vidx" };
        assert_eq!(keys.queue(JobType::SceneDetection), "vidx:queue:scene_detection");
        assert_eq!(
            keys.inflight(JobType::VideoIngestion),
            "vidx:inflight:video_ingestion"
        );
        assert_eq!(keys.job("job_1"), "vidx:job:job_1");
        assert_eq!(keys.by_video(VideoId(9)), "vidx:video_jobs:9");
    }
}
