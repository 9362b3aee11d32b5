//! End-to-end pipeline runs against the in-memory queue and store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vidx_embed::HashingEmbedder;
use vidx_media::{MediaError, MediaResult, MediaToolkit, SceneSpan, SubtitleCue, VideoInfo};
use vidx_models::{
    JobPayload, JobStatus, JobType, NewVideo, SearchRequest, StatusUpdate, Video, VideoId,
    VideoStatus,
};
use vidx_queue::{JobQueue, MemoryJobQueue, QueueConfig};
use vidx_search::{SearchConfig, SearchEngine};
use vidx_store::{MediaStore, MemoryMediaStore};
use vidx_worker::{JobExecutor, JobOutcome, RetryPolicy, StageContext, WorkerConfig};

const DIM: usize = 128;

/// Media toolkit that never shells out. Keyframes are real JPEGs so the
/// hashing embedder can decode them.
struct FakeToolkit {
    keyframe_dir: PathBuf,
    spans: Vec<SceneSpan>,
    cues: Vec<SubtitleCue>,
    probe_failures: AtomicU32,
    /// Time each probe takes, in milliseconds
    probe_delay_ms: AtomicU64,
    probe_calls: AtomicU32,
}

impl FakeToolkit {
    fn new(keyframe_dir: PathBuf) -> Self {
        let cue = |index, start, end, text: &str| SubtitleCue {
            index,
            start,
            end,
            text: text.to_string(),
        };
        Self {
            keyframe_dir,
            spans: vec![
                SceneSpan::new(0.0, 4.0),
                SceneSpan::new(4.0, 8.0),
                SceneSpan::new(8.0, 12.0),
            ],
            cues: vec![
                cue(1, 0.5, 3.0, "Good morning from the quiet harbor"),
                cue(2, 4.5, 7.5, "A car chase tears through the city"),
            ],
            probe_failures: AtomicU32::new(0),
            probe_delay_ms: AtomicU64::new(0),
            probe_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn content_hash(&self, path: &Path) -> MediaResult<String> {
        vidx_media::content_hash(path).await
    }

    async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let remaining = self.probe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MediaError::Timeout(1));
        }
        Ok(VideoInfo {
            duration: 12.0,
            width: 640,
            height: 360,
            fps: 25.0,
            codec: "h264".to_string(),
            format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            size: 1024,
            bitrate: 800_000,
            subtitle_streams: Vec::new(),
        })
    }

    async fn detect_scenes(&self, _path: &Path, _duration: f64) -> MediaResult<Vec<SceneSpan>> {
        Ok(self.spans.clone())
    }

    async fn extract_keyframe(&self, _path: &Path, at: f64, output: &Path) -> MediaResult<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let shade = (at * 20.0) as u8;
        image::RgbImage::from_pixel(32, 32, image::Rgb([shade, 255 - shade, 90]))
            .save(output)
            .map_err(|e| MediaError::invalid_video(e.to_string()))
    }

    async fn load_subtitles(&self, _path: &Path) -> MediaResult<Vec<SubtitleCue>> {
        Ok(self.cues.clone())
    }

    fn keyframe_path(&self, video_id: VideoId, scene_index: i32) -> PathBuf {
        self.keyframe_dir
            .join(video_id.to_string())
            .join(format!("scene_{:04}_keyframe.jpg", scene_index))
    }
}

struct Harness {
    dir: TempDir,
    queue: Arc<MemoryJobQueue>,
    store: Arc<MemoryMediaStore>,
    media: Arc<FakeToolkit>,
    executor: JobExecutor,
}

impl Harness {
    fn new() -> Self {
        Self::with_queue(QueueConfig::default())
    }

    fn with_queue(queue_config: QueueConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MemoryJobQueue::new(queue_config));
        let store = Arc::new(MemoryMediaStore::new(DIM));
        let media = Arc::new(FakeToolkit::new(dir.path().join("keyframes")));
        let ctx = StageContext::new(
            store.clone(),
            queue.clone(),
            media.clone(),
            Arc::new(HashingEmbedder::new(DIM)),
        )
        .with_embed_batch_size(2);
        let config = WorkerConfig {
            dequeue_timeout: Duration::from_millis(10),
            stage_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let retry = RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        let executor = JobExecutor::new(config, ctx, retry);
        Self {
            dir,
            queue,
            store,
            media,
            executor,
        }
    }

    async fn submit(&self, filename: &str, contents: &[u8], title: &str) -> Video {
        let path = self.dir.path().join(filename);
        std::fs::write(&path, contents).unwrap();
        self.submit_path(filename, &path, title).await
    }

    async fn submit_path(&self, filename: &str, path: &Path, title: &str) -> Video {
        let video = self
            .store
            .create_video(
                NewVideo::new(filename, path.to_string_lossy()).with_title(title),
            )
            .await
            .unwrap();
        self.queue
            .enqueue(JobPayload::for_stage(JobType::VideoIngestion, video.id))
            .await
            .unwrap();
        video
    }

    /// Poll every stage until a full pass finds nothing to do.
    async fn drain(&self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let mut idle = true;
            for job_type in JobType::ALL {
                if let Some(outcome) = self.executor.poll_once(job_type).await.unwrap() {
                    outcomes.push(outcome);
                    idle = false;
                }
            }
            if idle {
                return outcomes;
            }
        }
    }
}

#[tokio::test]
async fn test_video_runs_through_every_stage() {
    let h = Harness::new();
    let video = h.submit("harbor.mp4", b"harbor footage", "Harbor day").await;

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![JobOutcome::Completed; 4]);

    let video = h.store.get_video(video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Completed);
    assert_eq!(video.scene_count, 3);
    assert!((video.duration - 12.0).abs() < 1e-9);
    assert!(video.content_hash.is_some());
    assert_eq!(video.metadata["codec"], "h264");

    let scenes = h.store.scenes_for_video(video.id).await.unwrap();
    assert_eq!(scenes.len(), 3);
    for scene in &scenes {
        assert!(scene.has_embeddings());
        let keyframe = scene.keyframe_path.as_deref().unwrap();
        assert!(Path::new(keyframe).exists());
    }
    assert_eq!(
        scenes[1].caption.as_deref(),
        Some("A car chase tears through the city")
    );
    // No cue overlaps the last scene.
    assert_eq!(scenes[2].caption.as_deref(), Some(""));

    assert_eq!(video.caption_count, 2);
    assert_eq!(video.embedding_model.as_deref(), Some("hashing-v1"));
    let captions = h.store.captions_for_video(video.id).await.unwrap();
    assert_eq!(captions.len(), 2);
    assert_eq!(captions[1].text, "A car chase tears through the city");
    assert_eq!(captions[1].scene_id, Some(scenes[1].id));
    assert_eq!(captions[1].language, "en");

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    assert_eq!(jobs.len(), 4);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_completed_video_is_searchable() {
    let h = Harness::new();
    let video = h.submit("city.mp4", b"city footage", "City").await;
    h.drain().await;

    let engine = SearchEngine::new(
        h.store.clone(),
        Arc::new(HashingEmbedder::new(DIM)),
        SearchConfig::default(),
    );
    let response = engine
        .semantic(&SearchRequest::new("car chase"))
        .await
        .unwrap();
    let top = &response.results[0];
    assert_eq!(top.video.id, video.id);
    assert_eq!(top.scene.scene_index, 1);

    let response = engine.text(&SearchRequest::new("chase")).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].scene.scene_index, 1);
}

#[tokio::test]
async fn test_next_stage_waits_for_completion() {
    let h = Harness::new();
    let video = h.submit("a.mp4", b"a", "A").await;

    let outcome = h.executor.poll_once(JobType::VideoIngestion).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Completed));

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    let ingestion = jobs
        .iter()
        .find(|j| j.job_type == JobType::VideoIngestion)
        .unwrap();
    let scenes = jobs
        .iter()
        .find(|j| j.job_type == JobType::SceneDetection)
        .unwrap();
    assert_eq!(ingestion.status, JobStatus::Completed);
    assert_eq!(scenes.status, JobStatus::Pending);
    assert!(scenes.created_at >= ingestion.completed_at.unwrap());

    // Nothing further until scene detection runs.
    assert_eq!(
        h.executor.poll_once(JobType::CaptionExtraction).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_duplicate_content_fails_second_video() {
    let h = Harness::new();
    let first = h.submit("one.mp4", b"same bytes", "One").await;
    h.drain().await;
    let second = h.submit("two.mp4", b"same bytes", "Two").await;
    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![JobOutcome::Failed]);

    let second = h.store.get_video(second.id).await.unwrap();
    assert_eq!(second.status, VideoStatus::Failed);
    assert_eq!(second.metadata["duplicate_of"], first.id.as_i64());
    assert!(second
        .error_message
        .as_deref()
        .unwrap()
        .contains("duplicate"));

    // No retry for a duplicate.
    let jobs = h.queue.jobs_for_video(second.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let h = Harness::new();
    h.media.probe_failures.store(1, Ordering::SeqCst);
    let video = h.submit("flaky.mp4", b"flaky", "Flaky").await;

    let outcome = h.executor.poll_once(JobType::VideoIngestion).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Retrying));
    // The video keeps its status while a retry is pending.
    assert_ne!(
        h.store.get_video(video.id).await.unwrap().status,
        VideoStatus::Failed
    );

    h.executor.reap_once().await;
    h.drain().await;

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    let ingestion: Vec<_> = jobs
        .iter()
        .filter(|j| j.job_type == JobType::VideoIngestion)
        .collect();
    assert_eq!(ingestion.len(), 2);
    let failed = ingestion
        .iter()
        .find(|j| j.status == JobStatus::Failed)
        .unwrap();
    let retried = ingestion
        .iter()
        .find(|j| j.status == JobStatus::Completed)
        .unwrap();
    assert_eq!(retried.retry_of.as_ref(), Some(&failed.id));
    assert_eq!(retried.attempt, failed.attempt + 1);
    assert_eq!(
        h.store.get_video(video.id).await.unwrap().status,
        VideoStatus::Completed
    );
}

#[tokio::test]
async fn test_exhausted_retries_fail_video() {
    let h = Harness::new();
    h.media.probe_failures.store(10, Ordering::SeqCst);
    let video = h.submit("broken.mp4", b"broken", "Broken").await;

    let outcomes = h.drain().await;
    assert_eq!(
        outcomes,
        vec![
            JobOutcome::Retrying,
            JobOutcome::Retrying,
            JobOutcome::Failed
        ]
    );
    let video = h.store.get_video(video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert!(video.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_missing_file_fails_without_retry() {
    let h = Harness::new();
    let path = h.dir.path().join("gone.mp4");
    let video = h.submit_path("gone.mp4", &path, "Gone").await;

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![JobOutcome::Failed]);

    let video = h.store.get_video(video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert!(video.error_message.unwrap().contains("File not found"));
}

#[tokio::test]
async fn test_cancelled_job_is_not_run() {
    let h = Harness::new();
    let video = h.submit("c.mp4", b"c", "C").await;
    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    h.queue
        .update_status(&jobs[0].id, StatusUpdate::cancelled())
        .await
        .unwrap();

    assert!(h.drain().await.is_empty());
    let video = h.store.get_video(video.id).await.unwrap();
    assert!(video.content_hash.is_none());
}

#[tokio::test]
async fn test_shutdown_stops_run() {
    let h = Harness::new();
    let executor = Arc::new(h.executor);
    let handle = tokio::spawn(Arc::clone(&executor).run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_long_stage_keeps_its_lease() {
    let h = Harness::with_queue(
        QueueConfig::default().with_visibility_timeout(Duration::from_millis(50)),
    );
    h.media.probe_delay_ms.store(400, Ordering::SeqCst);
    let video = h.submit("long.mp4", b"long footage", "Long").await;

    // A second worker reaping and polling while the first one is busy.
    let rival = async {
        let mut redelivered = 0;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            h.queue.reap_expired().await.unwrap();
            if h
                .queue
                .dequeue(JobType::VideoIngestion, Duration::from_millis(1))
                .await
                .unwrap()
                .is_some()
            {
                redelivered += 1;
            }
        }
        redelivered
    };
    let (outcome, redelivered) =
        tokio::join!(h.executor.poll_once(JobType::VideoIngestion), rival);

    assert_eq!(outcome.unwrap(), Some(JobOutcome::Completed));
    assert_eq!(redelivered, 0);
    assert_eq!(h.media.probe_calls.load(Ordering::SeqCst), 1);

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    let ingestion = jobs
        .iter()
        .find(|j| j.job_type == JobType::VideoIngestion)
        .unwrap();
    assert_eq!(ingestion.status, JobStatus::Completed);
    assert_eq!(ingestion.attempt, 1);
}

#[tokio::test]
async fn test_job_cancelled_while_failing_is_not_retried() {
    let h = Harness::new();
    h.media.probe_delay_ms.store(100, Ordering::SeqCst);
    h.media.probe_failures.store(1, Ordering::SeqCst);
    let video = h.submit("late.mp4", b"late", "Late").await;
    let job_id = h.queue.jobs_for_video(video.id).await.unwrap()[0].id.clone();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.queue
            .update_status(&job_id, StatusUpdate::cancelled())
            .await
            .unwrap();
    };
    let (outcome, ()) = tokio::join!(h.executor.poll_once(JobType::VideoIngestion), cancel);
    assert_eq!(outcome.unwrap(), Some(JobOutcome::Skipped));

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Cancelled);
    assert_ne!(
        h.store.get_video(video.id).await.unwrap().status,
        VideoStatus::Failed
    );

    h.executor.reap_once().await;
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn test_job_cancelled_while_succeeding_does_not_advance() {
    let h = Harness::new();
    h.media.probe_delay_ms.store(100, Ordering::SeqCst);
    let video = h.submit("quit.mp4", b"quit", "Quit").await;
    let job_id = h.queue.jobs_for_video(video.id).await.unwrap()[0].id.clone();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.queue
            .update_status(&job_id, StatusUpdate::cancelled())
            .await
            .unwrap();
    };
    let (outcome, ()) = tokio::join!(h.executor.poll_once(JobType::VideoIngestion), cancel);
    assert_eq!(outcome.unwrap(), Some(JobOutcome::Skipped));

    let jobs = h.queue.jobs_for_video(video.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Cancelled);
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn test_finished_stages_can_run_again() {
    let h = Harness::new();
    let video = h.submit("again.mp4", b"again", "Again").await;
    h.drain().await;

    let scenes_before = h.store.scenes_for_video(video.id).await.unwrap();
    let captions_before = h.store.captions_for_video(video.id).await.unwrap();

    for job_type in JobType::ALL {
        h.queue
            .enqueue(JobPayload::for_stage(job_type, video.id))
            .await
            .unwrap();
    }
    let outcomes = h.drain().await;
    // Each re-run also schedules every stage after it.
    assert_eq!(outcomes, vec![JobOutcome::Completed; 10]);

    let video = h.store.get_video(video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Completed);
    assert_eq!(video.scene_count, 3);
    assert_eq!(video.caption_count, 2);

    let scenes_after = h.store.scenes_for_video(video.id).await.unwrap();
    assert_eq!(scenes_after, scenes_before);
    let captions_after = h.store.captions_for_video(video.id).await.unwrap();
    assert_eq!(captions_after.len(), captions_before.len());
    for (after, before) in captions_after.iter().zip(&captions_before) {
        assert_eq!(after.text, before.text);
        assert_eq!(after.scene_id, before.scene_id);
    }
    assert_eq!(h.media.probe_calls.load(Ordering::SeqCst), 2);
}
