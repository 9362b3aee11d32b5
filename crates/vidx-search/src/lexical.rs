//! Term-frequency relevance for text search.
//!
//! Scoring itself lives with the store so that candidate selection and
//! final ranking agree.

pub use vidx_store::lexical::{query_terms, score, METADATA_WEIGHT};
use vidx_store::SceneWithVideo;

/// Score, drop non-matches, order by score then lower scene id.
pub fn rank(candidates: Vec<SceneWithVideo>, terms: &[String]) -> Vec<(SceneWithVideo, u32)> {
    let mut scored: Vec<(SceneWithVideo, u32)> = candidates
        .into_iter()
        .map(|c| {
            let s = score(&c.scene, &c.video, terms);
            (c, s)
        })
        .filter(|(_, s)| *s > 0)
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| sb.cmp(sa).then(a.scene.id.cmp(&b.scene.id)));
    scored
}
