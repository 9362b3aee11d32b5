//! Subtitle cues stored per video.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{SceneId, VideoId};

/// Language recorded when the subtitle source does not name one.
pub const DEFAULT_CAPTION_LANGUAGE: &str = "en";

/// One timed subtitle line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Caption {
    pub id: i64,
    pub video_id: VideoId,
    /// Scene the cue starts in, if it overlaps any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<SceneId>,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub language: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// A cue to be written by the caption stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCaption {
    pub scene_id: Option<SceneId>,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub language: String,
    pub confidence: f32,
}

impl NewCaption {
    pub fn new(start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            scene_id: None,
            start_time,
            end_time,
            text: text.into(),
            language: DEFAULT_CAPTION_LANGUAGE.to_string(),
            confidence: 1.0,
        }
    }

    pub fn in_scene(mut self, scene_id: SceneId) -> Self {
        self.scene_id = Some(scene_id);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        if !language.trim().is_empty() {
            self.language = language;
        }
        self
    }
}
