//! Redis queue integration tests.

use std::time::Duration;

use vidx_models::{JobPayload, JobStatus, JobType, StatusUpdate, VideoId};
use vidx_queue::{JobQueue, QueueConfig, RedisJobQueue};

/// Queue on an isolated key prefix so runs never see each other's jobs.
fn test_queue(visibility: Duration) -> RedisJobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig::from_env()
        .with_prefix(format!("vidx-test-{}", uuid::Uuid::new_v4().simple()))
        .with_visibility_timeout(visibility);
    RedisJobQueue::new(config).expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_health() {
    let queue = test_queue(Duration::from_secs(60));
    queue.health().await.expect("Redis should answer PING");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_dequeue_ack() {
    let queue = test_queue(Duration::from_secs(60));
    let job = queue
        .enqueue(JobPayload::SceneDetection { video_id: VideoId(1) })
        .await
        .expect("Failed to enqueue");

    let got = queue
        .dequeue(JobType::SceneDetection, Duration::from_secs(1))
        .await
        .expect("Failed to dequeue")
        .expect("Job should be delivered");
    assert_eq!(got.id, job.id);

    queue.update_status(&got.id, StatusUpdate::running(30)).await.unwrap();
    let done = queue.update_status(&got.id, StatusUpdate::completed()).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    queue.ack(&got).await.unwrap();

    let depths = queue.queue_depths().await.unwrap();
    assert!(depths.iter().all(|d| d.pending == 0 && d.processing == 0));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dequeue_times_out_empty() {
    let queue = test_queue(Duration::from_secs(60));
    let got = queue
        .dequeue(JobType::CaptionExtraction, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(got.is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reaper_redelivers_expired_job() {
    let queue = test_queue(Duration::from_millis(100));
    let job = queue
        .enqueue(JobPayload::EmbeddingGeneration { video_id: VideoId(4) })
        .await
        .unwrap();
    queue
        .dequeue(JobType::EmbeddingGeneration, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("Job should be delivered");
    queue.update_status(&job.id, StatusUpdate::running(5)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let requeued = queue.reap_expired().await.unwrap();
    assert_eq!(requeued, vec![job.id.clone()]);

    let again = queue
        .dequeue(JobType::EmbeddingGeneration, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("Job should be redelivered");
    assert_eq!(again.id, job.id);
    assert_eq!(again.status, JobStatus::Pending);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_touched_job_outlives_visibility_timeout() {
    let queue = test_queue(Duration::from_millis(150));
    queue
        .enqueue(JobPayload::CaptionExtraction { video_id: VideoId(5) })
        .await
        .unwrap();
    let job = queue
        .dequeue(JobType::CaptionExtraction, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("Job should be delivered");

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.touch(&job).await.unwrap());
        assert!(queue.reap_expired().await.unwrap().is_empty());
    }

    queue.ack(&job).await.unwrap();
    assert!(!queue.touch(&job).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_listing_and_video_index() {
    let queue = test_queue(Duration::from_secs(60));
    let a = queue
        .enqueue(JobPayload::SceneDetection { video_id: VideoId(7) })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = queue
        .enqueue(JobPayload::CaptionExtraction { video_id: VideoId(7) })
        .await
        .unwrap();

    let listed = queue.list_jobs(None, 10).await.unwrap();
    assert_eq!(listed[0].id, b.id);
    assert_eq!(listed[1].id, a.id);

    let cancelled = queue.cancel_pending_for_video(VideoId(7)).await.unwrap();
    assert_eq!(cancelled.len(), 2);
    for job in queue.jobs_for_video(VideoId(7)).await.unwrap() {
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
