//! Search error types.

use thiserror::Error;
use vidx_embed::EmbedError;
use vidx_store::StoreError;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<validator::ValidationErrors> for SearchError {
    fn from(e: validator::ValidationErrors) -> Self {
        SearchError::InvalidRequest(e.to_string())
    }
}
