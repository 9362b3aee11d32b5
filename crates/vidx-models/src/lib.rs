//! Shared data models for the vidx ingestion engine.
//!
//! This crate provides Serde-serializable types for:
//! - Videos, their detected scenes and subtitle cues
//! - Pipeline jobs, typed payloads and status transitions
//! - Search requests and responses
//! - Aggregate statistics

pub mod caption;
pub mod job;
pub mod scene;
pub mod search;
pub mod stats;
pub mod video;

// Re-export common types
pub use caption::{Caption, NewCaption, DEFAULT_CAPTION_LANGUAGE};
pub use job::{Job, JobId, JobPayload, JobStatus, JobType, StatusUpdate, TransitionError};
pub use scene::{NewScene, Scene, SceneId};
pub use search::{EmbeddingKind, SearchRequest, SearchResponse, SearchResult};
pub use stats::{MediaStats, QueueDepth};
pub use video::{normalize_tags, NewVideo, Video, VideoId, VideoStatus};
