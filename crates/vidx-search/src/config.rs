//! Search configuration.

use vidx_store::Precision;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Exact scans for semantic search instead of the HNSW index
    pub precision: Precision,
    /// Upper bound on rows pulled from the store for lexical scoring
    pub text_candidate_cap: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Approximate,
            text_candidate_cap: 2000,
        }
    }
}

impl SearchConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let exact = std::env::var("SEARCH_EXACT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        Self {
            precision: if exact {
                Precision::Exact
            } else {
                Precision::Approximate
            },
            text_candidate_cap: std::env::var("SEARCH_TEXT_CANDIDATE_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(2000),
        }
    }
}
