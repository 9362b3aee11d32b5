//! The search engine.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use validator::Validate;
use vidx_embed::Embedder;
use vidx_models::{SearchRequest, SearchResponse, SearchResult as Hit};
use vidx_store::{MediaStore, SceneFilter};

use crate::config::SearchConfig;
use crate::error::SearchResult;
use crate::lexical;

pub struct SearchEngine {
    store: Arc<dyn MediaStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn MediaStore>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Rank scenes by cosine similarity between the query embedding and the
    /// requested scene vector. Scenes without that vector never appear.
    pub async fn semantic(&self, request: &SearchRequest) -> SearchResult<SearchResponse> {
        request.validate()?;
        let started = Instant::now();
        let query = request.query.trim();

        let vector = self.embedder.embed_query(query).await?;
        if vector.iter().all(|x| *x == 0.0) {
            debug!(query, "Query has no embeddable content");
            return Ok(respond(query, Vec::new(), started));
        }

        let filter = filter_for(request);
        let scored = self
            .store
            .nearest_scenes(
                &vector,
                request.kind(),
                request.effective_limit(),
                &filter,
                self.config.precision,
            )
            .await?;

        let threshold = request.similarity_threshold.unwrap_or(f32::MIN);
        let results: Vec<Hit> = scored
            .into_iter()
            .filter(|s| s.similarity >= threshold)
            .map(|s| Hit {
                scene_id: s.scene.id,
                scene: s.scene,
                video: s.video,
                similarity: s.similarity,
            })
            .collect();

        info!(
            query,
            kind = %request.kind(),
            results = results.len(),
            "Semantic search"
        );
        Ok(respond(query, results, started))
    }

    /// Rank scenes by term frequency over caption, title and tags. The
    /// reported similarity is the score relative to the best hit.
    pub async fn text(&self, request: &SearchRequest) -> SearchResult<SearchResponse> {
        request.validate()?;
        let started = Instant::now();
        let query = request.query.trim();

        let terms = lexical::query_terms(query);
        if terms.is_empty() {
            return Ok(respond(query, Vec::new(), started));
        }

        let candidates = self
            .store
            .text_candidates(&terms, &filter_for(request), self.config.text_candidate_cap)
            .await?;
        let ranked = lexical::rank(candidates, &terms);
        let best = ranked.first().map_or(1, |(_, s)| *s) as f32;

        let threshold = request.similarity_threshold.unwrap_or(0.0);
        let results: Vec<Hit> = ranked
            .into_iter()
            .map(|(c, s)| (c, s as f32 / best))
            .filter(|(_, sim)| *sim >= threshold)
            .take(request.effective_limit())
            .map(|(c, similarity)| Hit {
                scene_id: c.scene.id,
                scene: c.scene,
                video: c.video,
                similarity,
            })
            .collect();

        info!(query, terms = terms.len(), results = results.len(), "Text search");
        Ok(respond(query, results, started))
    }
}

fn filter_for(request: &SearchRequest) -> SceneFilter {
    SceneFilter {
        video_ids: request.video_ids.clone(),
    }
}

fn respond(query: &str, results: Vec<Hit>, started: Instant) -> SearchResponse {
    SearchResponse {
        query: query.to_string(),
        total_found: results.len(),
        results,
        search_time_ms: started.elapsed().as_millis() as u64,
    }
}
