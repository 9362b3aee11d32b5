//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use vidx_embed::{build_embedder, EmbedConfig};
use vidx_queue::{JobQueue, RedisJobQueue};
use vidx_search::{SearchConfig, SearchEngine};
use vidx_store::{MediaStore, PgMediaStore, StoreConfig};

use crate::config::ApiConfig;

/// Shared application state. Every dependency is handed in explicitly so
/// handlers can be exercised against in-memory backends.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn MediaStore>,
    pub queue: Arc<dyn JobQueue>,
    pub search: Arc<SearchEngine>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn MediaStore>,
        queue: Arc<dyn JobQueue>,
        search: Arc<SearchEngine>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            search,
        }
    }

    /// Connect the production backends named by the environment.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let queue = RedisJobQueue::from_env().context("failed to create job queue")?;

        let store_config = StoreConfig::from_env();
        let store: Arc<dyn MediaStore> = Arc::new(
            PgMediaStore::connect(&store_config)
                .await
                .context("failed to connect to the media store")?,
        );

        let embedder = build_embedder(&EmbedConfig::from_env())?;
        anyhow::ensure!(
            embedder.dimension() == store_config.embedding_dim,
            "embedder {} produces {}-dimensional vectors but the store expects {}",
            embedder.model_id(),
            embedder.dimension(),
            store_config.embedding_dim
        );
        info!(model = embedder.model_id(), "Query embedder ready");

        let search = Arc::new(SearchEngine::new(
            Arc::clone(&store),
            embedder,
            SearchConfig::from_env(),
        ));

        Ok(Self::new(config, store, Arc::new(queue), search))
    }
}
