//! Scene records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::VideoId;

/// Surrogate key of a scene row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SceneId(pub i64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous shot of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub id: SceneId,
    pub video_id: VideoId,
    /// Position of the shot within its video, starting at 0
    pub scene_index: i32,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe_path: Option<String>,
    /// Null until the caption stage has run for this scene
    pub caption: Option<String>,
    #[serde(default, skip_serializing)]
    pub visual_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing)]
    pub text_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Scene {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    pub fn has_embeddings(&self) -> bool {
        self.visual_embedding.is_some() && self.text_embedding.is_some()
    }
}

/// A detected shot to be written by the scene detection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScene {
    pub scene_index: i32,
    pub start_time: f64,
    pub end_time: f64,
    pub keyframe_path: Option<String>,
}
