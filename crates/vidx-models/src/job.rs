//! Pipeline job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::VideoId;

/// Unique identifier for a job.
///
/// Generated ids are `job_` followed by a UUIDv7, so they sort roughly by
/// creation time and stay unique across concurrent producers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new time-ordered job ID.
    pub fn new() -> Self {
        Self(format!("job_{}", Uuid::now_v7().simple()))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage a job belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    VideoIngestion,
    SceneDetection,
    CaptionExtraction,
    EmbeddingGeneration,
}

impl JobType {
    /// Every stage, in pipeline order.
    pub const ALL: [JobType; 4] = [
        JobType::VideoIngestion,
        JobType::SceneDetection,
        JobType::CaptionExtraction,
        JobType::EmbeddingGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::VideoIngestion => "video_ingestion",
            JobType::SceneDetection => "scene_detection",
            JobType::CaptionExtraction => "caption_extraction",
            JobType::EmbeddingGeneration => "embedding_generation",
        }
    }

    /// Stage that runs after this one, if any.
    pub fn next(&self) -> Option<JobType> {
        match self {
            JobType::VideoIngestion => Some(JobType::SceneDetection),
            JobType::SceneDetection => Some(JobType::CaptionExtraction),
            JobType::CaptionExtraction => Some(JobType::EmbeddingGeneration),
            JobType::EmbeddingGeneration => None,
        }
    }

    /// Stage that must have completed before this one may run.
    pub fn previous(&self) -> Option<JobType> {
        match self {
            JobType::VideoIngestion => None,
            JobType::SceneDetection => Some(JobType::VideoIngestion),
            JobType::CaptionExtraction => Some(JobType::SceneDetection),
            JobType::EmbeddingGeneration => Some(JobType::CaptionExtraction),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type: {}", s))
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in queue
    #[default]
    Pending,
    /// Picked up by a worker
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed job payload, one shape per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    VideoIngestion {
        video_id: VideoId,
        #[serde(default)]
        filename: String,
        #[serde(default)]
        filepath: String,
    },
    SceneDetection {
        video_id: VideoId,
    },
    CaptionExtraction {
        video_id: VideoId,
    },
    EmbeddingGeneration {
        video_id: VideoId,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::VideoIngestion { .. } => JobType::VideoIngestion,
            JobPayload::SceneDetection { .. } => JobType::SceneDetection,
            JobPayload::CaptionExtraction { .. } => JobType::CaptionExtraction,
            JobPayload::EmbeddingGeneration { .. } => JobType::EmbeddingGeneration,
        }
    }

    pub fn video_id(&self) -> VideoId {
        match self {
            JobPayload::VideoIngestion { video_id, .. }
            | JobPayload::SceneDetection { video_id }
            | JobPayload::CaptionExtraction { video_id }
            | JobPayload::EmbeddingGeneration { video_id } => *video_id,
        }
    }

    /// Payload for a given stage that only carries the video id.
    ///
    /// Ingestion payloads built this way have empty file fields; the worker
    /// reads the authoritative path from the video row.
    pub fn for_stage(job_type: JobType, video_id: VideoId) -> Self {
        match job_type {
            JobType::VideoIngestion => JobPayload::VideoIngestion {
                video_id,
                filename: String::new(),
                filepath: String::new(),
            },
            JobType::SceneDetection => JobPayload::SceneDetection { video_id },
            JobType::CaptionExtraction => JobPayload::CaptionExtraction { video_id },
            JobType::EmbeddingGeneration => JobPayload::EmbeddingGeneration { video_id },
        }
    }

    /// Build a payload from a stage name and a loose JSON object.
    pub fn from_parts(job_type: JobType, value: serde_json::Value) -> Result<Self, String> {
        let mut obj = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => return Err(format!("payload must be an object, got {}", other)),
        };
        obj.insert(
            "type".to_string(),
            serde_json::Value::String(job_type.as_str().to_string()),
        );
        serde_json::from_value(serde_json::Value::Object(obj)).map_err(|e| e.to_string())
    }

    /// Checks that must pass before a payload may be enqueued.
    pub fn validate(&self) -> Result<(), String> {
        if self.video_id().0 <= 0 {
            return Err(format!("invalid video_id: {}", self.video_id()));
        }
        Ok(())
    }
}

/// Requested status change for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// New progress; lower values than the stored one are ignored
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn running(progress: u8) -> Self {
        Self {
            status: JobStatus::Running,
            progress: Some(progress),
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            progress: Some(100),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            progress: None,
            error: None,
        }
    }

    /// Reset used when an expired in-flight job is redelivered.
    pub fn requeued() -> Self {
        Self {
            status: JobStatus::Pending,
            progress: None,
            error: None,
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {id} is already {status}")]
    Terminal { id: JobId, status: JobStatus },
}

/// A unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    #[serde(rename = "type")]
    pub job_type: JobType,

    pub payload: JobPayload,

    #[serde(default)]
    pub status: JobStatus,

    /// 0-100
    #[serde(default)]
    pub progress: u8,

    /// 1-based attempt number of this unit of work
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    #[serde(default = "default_attempt")]
    pub max_attempts: u32,

    /// Job this one retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<JobId>,

    /// Earliest time a worker may pick the job up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_attempt() -> u32 {
    1
}

impl Job {
    /// Create a pending job for the given payload.
    pub fn new(payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: payload.job_type(),
            payload,
            status: JobStatus::Pending,
            progress: 0,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            retry_of: None,
            not_before: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn with_retry_of(mut self, id: JobId) -> Self {
        self.retry_of = Some(id);
        self
    }

    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    pub fn video_id(&self) -> VideoId {
        self.payload.video_id()
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Fresh pending job for the next attempt of the same work.
    pub fn next_attempt(&self, not_before: DateTime<Utc>) -> Job {
        Job::new(self.payload.clone(), self.max_attempts)
            .with_attempt(self.attempt + 1)
            .with_retry_of(self.id.clone())
            .with_not_before(not_before)
    }

    /// Apply a status change in place.
    ///
    /// Terminal jobs are immutable, progress never moves backwards, and
    /// `error` is present only while the job is failed.
    pub fn apply_update(
        &mut self,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                id: self.id.clone(),
                status: self.status,
            });
        }

        let mut progress = self.progress;
        if let Some(p) = update.progress {
            progress = progress.max(p.min(100));
        }

        match update.status {
            JobStatus::Pending => {}
            JobStatus::Running => {
                if self.status != JobStatus::Running {
                    self.started_at = Some(now);
                }
            }
            JobStatus::Completed => {
                progress = 100;
                self.completed_at = Some(now);
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(now);
            }
        }

        self.error = match update.status {
            JobStatus::Failed => Some(
                update
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            _ => None,
        };
        self.status = update.status;
        self.progress = progress;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestion(video_id: i64) -> JobPayload {
        JobPayload::VideoIngestion {
            video_id: VideoId(video_id),
            filename: "a.mp4".into(),
            filepath: "/data/a.mp4".into(),
        }
    }

    #[test]
    fn test_job_id_is_prefixed_and_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert!(a.as_str().starts_with("job_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(JobType::VideoIngestion.next(), Some(JobType::SceneDetection));
        assert_eq!(JobType::EmbeddingGeneration.next(), None);
        assert_eq!(JobType::VideoIngestion.previous(), None);
        for t in JobType::ALL {
            if let Some(next) = t.next() {
                assert_eq!(next.previous(), Some(t));
            }
        }
    }

    #[test]
    fn test_job_type_from_str() {
        assert_eq!(
            "caption_extraction".parse::<JobType>().unwrap(),
            JobType::CaptionExtraction
        );
        assert!("transcode".parse::<JobType>().is_err());
    }

    #[test]
    fn test_payload_tagged_serialization() {
        let json = serde_json::to_value(JobPayload::SceneDetection {
            video_id: VideoId(7),
        })
        .unwrap();
        assert_eq!(json["type"], "scene_detection");
        assert_eq!(json["video_id"], 7);
    }

    #[test]
    fn test_payload_from_parts() {
        let payload = JobPayload::from_parts(
            JobType::EmbeddingGeneration,
            serde_json::json!({"video_id": 3}),
        )
        .unwrap();
        assert_eq!(payload.job_type(), JobType::EmbeddingGeneration);
        assert_eq!(payload.video_id(), VideoId(3));

        let err = JobPayload::from_parts(JobType::SceneDetection, serde_json::json!({}));
        assert!(err.is_err());
    }

    #[test]
    fn test_payload_validate_rejects_bad_video_id() {
        assert!(JobPayload::for_stage(JobType::SceneDetection, VideoId(0))
            .validate()
            .is_err());
        assert!(ingestion(1).validate().is_ok());
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut job = Job::new(ingestion(1), 3);
        let now = Utc::now();
        job.apply_update(&StatusUpdate::running(10), now).unwrap();
        assert_eq!(job.started_at, Some(now));
        assert!(job.completed_at.is_none());

        job.apply_update(&StatusUpdate::completed(), now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.completed_at, Some(now));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = Job::new(ingestion(1), 3);
        let now = Utc::now();
        job.apply_update(&StatusUpdate::running(50), now).unwrap();
        job.apply_update(&StatusUpdate::running(20), now).unwrap();
        assert_eq!(job.progress, 50);
        job.apply_update(&StatusUpdate::running(250), now).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut job = Job::new(ingestion(1), 3);
        let now = Utc::now();
        job.apply_update(&StatusUpdate::failed("boom"), now).unwrap();
        assert_eq!(job.error.as_deref(), Some("boom"));

        let before = job.clone();
        let err = job.apply_update(&StatusUpdate::running(90), now).unwrap_err();
        assert!(matches!(err, TransitionError::Terminal { status: JobStatus::Failed, .. }));
        assert_eq!(job, before);
    }

    #[test]
    fn test_cancel_sets_completed_at() {
        let mut job = Job::new(ingestion(1), 3);
        job.apply_update(&StatusUpdate::cancelled(), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_next_attempt_links_to_previous() {
        let job = Job::new(ingestion(1), 3);
        let retry = job.next_attempt(Utc::now());
        assert_ne!(retry.id, job.id);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of.as_ref(), Some(&job.id));
        assert_eq!(retry.payload, job.payload);
        assert!(retry.can_retry());
        assert!(!retry.next_attempt(Utc::now()).can_retry());
    }
}
