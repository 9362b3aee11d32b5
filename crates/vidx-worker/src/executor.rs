//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use vidx_models::{Job, JobPayload, JobStatus, JobType, StatusUpdate};
use vidx_queue::QueueError;
use vidx_store::VideoPatch;

use crate::config::{heartbeat_interval, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::stages::{run_stage, StageContext};

/// What happened to a delivered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed; a follow-up attempt has been scheduled
    Retrying,
    /// Failed for good
    Failed,
    /// Cancelled or already finished before it could run, or settled
    /// elsewhere while it ran
    Skipped,
}

/// Runs consumer loops for every job type until shutdown.
pub struct JobExecutor {
    config: WorkerConfig,
    ctx: Arc<StageContext>,
    retry: RetryPolicy,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, ctx: StageContext, retry: RetryPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            ctx: Arc::new(ctx),
            retry,
            shutdown,
        }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Start the consumers and the reaper, and return once shutdown has been
    /// signalled and in-flight jobs have drained (or the grace period ran out).
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        self.ctx.queue.health().await?;

        let mut tasks = JoinSet::new();

        for job_type in JobType::ALL {
            let consumers = self.config.concurrency_for(job_type);
            info!(
                "Starting {} consumer(s) for {}",
                consumers,
                job_type.as_str()
            );
            for n in 0..consumers {
                let this = Arc::clone(&self);
                let span = tracing::info_span!("consumer", job_type = %job_type, n);
                tasks.spawn(async move { this.consume(job_type).await }.instrument(span));
            }
        }

        let this = Arc::clone(&self);
        tasks.spawn(async move { this.reap_loop().await });

        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("Shutdown signal received, waiting for in-flight jobs to complete...");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            // Unacknowledged jobs are redelivered once their visibility
            // timeout passes.
            warn!("Shutdown timeout reached, aborting remaining jobs");
            tasks.abort_all();
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume(&self, job_type: JobType) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            // Only the wait is interruptible; a dequeued job runs to the end.
            let dequeued = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                result = self.ctx.queue.dequeue(job_type, self.config.dequeue_timeout) => result,
            };
            match dequeued {
                Ok(Some(job)) => {
                    self.execute_job(job).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error consuming {} jobs: {}", job_type.as_str(), e);
                    // Back off on error
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
        debug!("Consumer for {} stopped", job_type.as_str());
    }

    /// Dequeue at most one job of `job_type` and run it to an outcome.
    pub async fn poll_once(&self, job_type: JobType) -> WorkerResult<Option<JobOutcome>> {
        match self
            .ctx
            .queue
            .dequeue(job_type, self.config.dequeue_timeout)
            .await?
        {
            Some(job) => Ok(Some(self.execute_job(job).await)),
            None => Ok(None),
        }
    }

    async fn reap_loop(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.reaper_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => self.reap_once().await,
            }
        }
    }

    /// Redeliver expired in-flight jobs and release due delayed jobs.
    pub async fn reap_once(&self) {
        match self.ctx.queue.reap_expired().await {
            Ok(ids) if !ids.is_empty() => {
                warn!("Requeued {} jobs whose visibility timeout expired", ids.len());
                metrics::record_jobs_reaped(ids.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to reap expired jobs: {}", e),
        }
        match self.ctx.queue.promote_due().await {
            Ok(n) if n > 0 => debug!("Promoted {} delayed jobs", n),
            Ok(_) => {}
            Err(e) => warn!("Failed to promote delayed jobs: {}", e),
        }
    }

    /// Run one delivered job through its stage and settle it.
    pub async fn execute_job(&self, job: Job) -> JobOutcome {
        let logger = JobLogger::new(&job);
        let span = logger.create_span();
        let outcome = self.settle(job.clone(), &logger).instrument(span).await;

        if let Err(e) = self.ctx.queue.ack(&job).await {
            logger.log_error(&format!("failed to ack: {}", e));
        }
        outcome
    }

    async fn settle(&self, job: Job, logger: &JobLogger) -> JobOutcome {
        let job = match self
            .ctx
            .queue
            .update_status(&job.id, StatusUpdate::running(0))
            .await
        {
            Ok(job) => job,
            Err(QueueError::InvalidTransition(e)) => {
                logger.log_warning(&format!("not running: {}", e));
                return JobOutcome::Skipped;
            }
            Err(e) => {
                // Leave it in flight; the reaper hands it out again.
                logger.log_error(&format!("could not mark running: {}", e));
                return JobOutcome::Skipped;
            }
        };
        if job.status != JobStatus::Running {
            return JobOutcome::Skipped;
        }

        let started = Instant::now();
        let timeout = self.config.stage_timeout;
        let stage = tokio::time::timeout(timeout, run_stage(&self.ctx, &job));
        tokio::pin!(stage);

        // Renew the lease while the stage runs so the reaper never hands
        // the job to a second worker.
        let every = heartbeat_interval(self.ctx.queue.visibility_timeout());
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                finished = &mut stage => break match finished {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::Timeout(timeout.as_secs())),
                },
                _ = heartbeat.tick() => self.renew_lease(&job, logger).await,
            }
        };

        match result {
            Ok(()) => self.on_success(&job, logger, started).await,
            Err(e) => self.on_failure(&job, logger, e).await,
        }
    }

    async fn renew_lease(&self, job: &Job, logger: &JobLogger) {
        match self.ctx.queue.touch(job).await {
            Ok(true) => {}
            Ok(false) => logger.log_warning("job is no longer in flight"),
            Err(e) => logger.log_warning(&format!("could not renew lease: {}", e)),
        }
    }

    async fn on_success(&self, job: &Job, logger: &JobLogger, started: Instant) -> JobOutcome {
        match self
            .ctx
            .queue
            .update_status(&job.id, StatusUpdate::completed())
            .await
        {
            Ok(_) => {}
            // Cancelled while running: the next stage must not start.
            Err(QueueError::InvalidTransition(e)) => {
                logger.log_warning(&format!("finished but not completed: {}", e));
                return JobOutcome::Skipped;
            }
            Err(e) => {
                // Not completed means the next stage must not start.
                logger.log_error(&format!("could not mark completed: {}", e));
                return JobOutcome::Failed;
            }
        }
        metrics::record_job_completed(job.job_type, started.elapsed().as_secs_f64());
        logger.log_completion(&format!("{:.2}s", started.elapsed().as_secs_f64()));

        if let Some(next) = job.job_type.next() {
            let payload = JobPayload::for_stage(next, job.video_id());
            match self.ctx.queue.enqueue(payload).await {
                Ok(next_job) => info!(
                    job_id = %next_job.id,
                    video_id = %job.video_id(),
                    "Enqueued {}",
                    next.as_str()
                ),
                Err(e) => {
                    logger.log_error(&format!("failed to enqueue {}: {}", next.as_str(), e));
                    self.fail_video(job, &format!("failed to schedule {}: {}", next.as_str(), e))
                        .await;
                }
            }
        }
        JobOutcome::Completed
    }

    async fn on_failure(&self, job: &Job, logger: &JobLogger, err: WorkerError) -> JobOutcome {
        let message = err.to_string();
        let retryable = err.is_retryable();
        logger.log_error(&message);
        metrics::record_job_failed(job.job_type, retryable);

        match self
            .ctx
            .queue
            .update_status(&job.id, StatusUpdate::failed(message.clone()))
            .await
        {
            Ok(_) => {}
            // Someone else settled the job while it ran; a retry would undo that.
            Err(QueueError::InvalidTransition(e)) => {
                logger.log_warning(&format!("not retrying: {}", e));
                return JobOutcome::Skipped;
            }
            Err(e) => logger.log_warning(&format!("could not mark failed: {}", e)),
        }

        if retryable && job.can_retry() {
            let delay = self.retry.delay_after(job.attempt);
            match self
                .ctx
                .queue
                .enqueue_delayed(job.payload.clone(), delay, Some(job.id.clone()), job.attempt + 1)
                .await
            {
                Ok(retry) => {
                    metrics::record_job_retried(job.job_type);
                    info!(
                        job_id = %retry.id,
                        retry_of = %job.id,
                        "Scheduled attempt {}/{} in {:?}",
                        retry.attempt,
                        retry.max_attempts,
                        delay
                    );
                    return JobOutcome::Retrying;
                }
                Err(e) => logger.log_error(&format!("failed to schedule retry: {}", e)),
            }
        }

        match &err {
            WorkerError::VideoNotFound(_) => {}
            WorkerError::Duplicate { existing } => {
                let patch = VideoPatch::failed(message.clone())
                    .with_metadata("duplicate_of", json!(existing.as_i64()));
                if let Err(e) = self.ctx.store.update_video(job.video_id(), patch).await {
                    logger.log_warning(&format!("could not mark video failed: {}", e));
                }
            }
            _ => self.fail_video(job, &message).await,
        }
        JobOutcome::Failed
    }

    async fn fail_video(&self, job: &Job, message: &str) {
        if let Err(e) = self
            .ctx
            .store
            .update_video(job.video_id(), VideoPatch::failed(message))
            .await
        {
            warn!(video_id = %job.video_id(), "Could not mark video failed: {}", e);
        }
    }
}
