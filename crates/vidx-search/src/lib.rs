//! Scene search over the media store.
//!
//! Two modes share one request shape:
//! - semantic: embed the query and rank scenes by cosine similarity
//! - text: match query terms against captions, titles and tags

pub mod config;
pub mod engine;
pub mod error;
pub mod lexical;

pub use config::SearchConfig;
pub use engine::SearchEngine;
pub use error::{SearchError, SearchResult};
