//! Search request and response shapes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::{Scene, SceneId, Video, VideoId};

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// Which scene vector a semantic query is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    #[default]
    Text,
    Visual,
    /// Mean of the text and visual similarities
    Combined,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Text => "text",
            EmbeddingKind::Visual => "visual",
            EmbeddingKind::Combined => "combined",
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(EmbeddingKind::Text),
            "visual" => Ok(EmbeddingKind::Visual),
            "combined" => Ok(EmbeddingKind::Combined),
            other => Err(format!("unknown embedding type: {}", other)),
        }
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("query must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Body of both search endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct SearchRequest {
    #[serde(default)]
    #[validate(
        length(max = 1000, message = "query is too long"),
        custom(function = "validate_not_blank")
    )]
    pub query: String,

    /// Restrict results to these videos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ids: Option<Vec<VideoId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<u32>,

    /// Minimum similarity a semantic hit must reach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0, message = "similarity_threshold must be between 0 and 1"))]
    pub similarity_threshold: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_type: Option<EmbeddingKind>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT) as usize
    }

    pub fn kind(&self) -> EmbeddingKind {
        self.embedding_type.unwrap_or_default()
    }
}

/// One ranked scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub scene_id: SceneId,
    pub scene: Scene,
    pub video: Video,
    /// Cosine similarity for semantic search, normalised relevance for text search
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_found: usize,
    pub search_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_query_is_invalid() {
        assert!(SearchRequest::new("   ").validate().is_err());
        assert!(SearchRequest::default().validate().is_err());
        assert!(SearchRequest::new("car chase").validate().is_ok());
    }

    #[test]
    fn test_limit_bounds() {
        let mut req = SearchRequest::new("x");
        req.limit = Some(0);
        assert!(req.validate().is_err());
        req.limit = Some(101);
        assert!(req.validate().is_err());
        req.limit = Some(5);
        assert!(req.validate().is_ok());
        assert_eq!(req.effective_limit(), 5);
        assert_eq!(SearchRequest::new("x").effective_limit(), 10);
    }

    #[test]
    fn test_threshold_bounds() {
        let mut req = SearchRequest::new("x");
        req.similarity_threshold = Some(1.5);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_missing_query_deserializes_to_invalid() {
        let req: SearchRequest = serde_json::from_str(r#"{"limit": 3}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_embedding_kind_parse() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"query":"a","embedding_type":"combined"}"#).unwrap();
        assert_eq!(req.kind(), EmbeddingKind::Combined);
        assert_eq!(SearchRequest::new("a").kind(), EmbeddingKind::Text);
    }
}
