//! The media store contract.

use async_trait::async_trait;
use serde::Serialize;
use vidx_models::{
    Caption, EmbeddingKind, MediaStats, NewCaption, NewScene, NewVideo, Scene, SceneId, Video,
    VideoId, VideoStatus,
};

use crate::error::StoreResult;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Offset pagination with a hard cap on page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Out-of-range limits fall back to the default or the cap, negative
    /// offsets to zero.
    pub fn clamped(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > MAX_PAGE_LIMIT => MAX_PAGE_LIMIT,
            Some(l) if l > 0 => l,
            _ => DEFAULT_PAGE_LIMIT,
        };
        Self {
            limit,
            offset: offset.filter(|o| *o > 0).unwrap_or(0),
        }
    }
}

/// Partial update of a video row. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    /// `Some(None)` clears the stored error
    pub error_message: Option<Option<String>>,
    /// Keys merged into the stored metadata
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub embedding_model: Option<String>,
    /// Stamp `last_processed_at` with the current time
    pub touch_processed: bool,
}

impl VideoPatch {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            touch_processed: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(VideoStatus::Failed),
            error_message: Some(Some(error.into())),
            touch_processed: true,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Restricts scene queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneFilter {
    pub video_ids: Option<Vec<VideoId>>,
}

impl SceneFilter {
    pub fn videos(ids: Vec<VideoId>) -> Self {
        Self {
            video_ids: Some(ids),
        }
    }

    pub fn matches(&self, video_id: VideoId) -> bool {
        self.video_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&video_id))
    }

    pub(crate) fn as_i64s(&self) -> Option<Vec<i64>> {
        self.video_ids
            .as_ref()
            .map(|ids| ids.iter().map(|v| v.0).collect())
    }
}

/// How nearest-neighbour queries are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// Full scan with exact distances
    Exact,
    /// HNSW index walk
    #[default]
    Approximate,
}

/// A scene joined with its owning video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneWithVideo {
    pub scene: Scene,
    pub video: Video,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredScene {
    pub scene: Scene,
    pub video: Video,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Persistent record of videos and scenes.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Insert a video in `pending` status.
    async fn create_video(&self, video: NewVideo) -> StoreResult<Video>;

    async fn get_video(&self, id: VideoId) -> StoreResult<Video>;

    /// Newest first.
    async fn list_videos(&self, page: Page) -> StoreResult<Vec<Video>>;

    async fn count_videos(&self) -> StoreResult<i64>;

    async fn update_video(&self, id: VideoId, patch: VideoPatch) -> StoreResult<Video>;

    /// Record the content hash, failing with `DuplicateContent` when another
    /// video already owns it.
    async fn set_content_hash(&self, id: VideoId, hash: &str) -> StoreResult<()>;

    /// Mark the video completed if it has scenes and all of them carry both
    /// embeddings. Returns whether the status changed.
    async fn complete_if_embedded(&self, id: VideoId) -> StoreResult<bool>;

    /// Delete a video and, by cascade, its scenes and captions.
    async fn delete_video(&self, id: VideoId) -> StoreResult<()>;

    /// Insert or update scenes keyed by `(video_id, scene_index)` and set the
    /// video's scene count. Scenes beyond the new set are removed.
    async fn upsert_scenes(&self, video_id: VideoId, scenes: &[NewScene]) -> StoreResult<Vec<Scene>>;

    /// Ordered by scene index.
    async fn scenes_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Scene>>;

    async fn set_scene_keyframe(&self, id: SceneId, path: &str) -> StoreResult<()>;

    async fn set_scene_caption(&self, id: SceneId, caption: &str) -> StoreResult<()>;

    /// Swap the video's stored cues for `captions` and set its caption
    /// count. Returns the number stored.
    async fn replace_captions(&self, video_id: VideoId, captions: &[NewCaption]) -> StoreResult<i32>;

    /// Ordered by start time.
    async fn captions_for_video(&self, video_id: VideoId) -> StoreResult<Vec<Caption>>;

    async fn set_scene_embeddings(
        &self,
        id: SceneId,
        visual: &[f32],
        text: &[f32],
    ) -> StoreResult<()>;

    /// Top `k` scenes by cosine similarity to `query`, ties to the lower id.
    /// Scenes missing the compared vector(s) are skipped.
    async fn nearest_scenes(
        &self,
        query: &[f32],
        kind: EmbeddingKind,
        k: usize,
        filter: &SceneFilter,
        precision: Precision,
    ) -> StoreResult<Vec<ScoredScene>>;

    /// Scenes whose caption, video title or tags contain any of `terms` as a
    /// whole token (case-insensitive). The `cap` best rows by
    /// [`crate::lexical::score`], ties to the lower scene id.
    async fn text_candidates(
        &self,
        terms: &[String],
        filter: &SceneFilter,
        cap: usize,
    ) -> StoreResult<Vec<SceneWithVideo>>;

    async fn stats(&self) -> StoreResult<MediaStats>;

    async fn health(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamping() {
        assert_eq!(Page::clamped(Some(500), None).limit, 100);
        assert_eq!(Page::clamped(Some(-5), None).limit, 20);
        assert_eq!(Page::clamped(Some(0), None).limit, 20);
        assert_eq!(Page::clamped(None, None), Page::default());
        assert_eq!(Page::clamped(Some(7), Some(-3)), Page { limit: 7, offset: 0 });
        assert_eq!(Page::clamped(Some(7), Some(14)).offset, 14);
    }

    #[test]
    fn test_scene_filter_matches() {
        assert!(SceneFilter::default().matches(VideoId(3)));
        let filter = SceneFilter::videos(vec![VideoId(1)]);
        assert!(filter.matches(VideoId(1)));
        assert!(!filter.matches(VideoId(2)));
    }
}
