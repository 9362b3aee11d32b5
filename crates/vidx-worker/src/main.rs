//! Pipeline worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidx_embed::{build_embedder, EmbedConfig};
use vidx_media::{check_ffmpeg, check_ffprobe, FfmpegToolkit, MediaConfig};
use vidx_queue::{QueueConfig, RedisJobQueue};
use vidx_store::{PgMediaStore, StoreConfig};
use vidx_worker::config::heartbeat_interval;
use vidx_worker::{metrics, JobExecutor, RetryPolicy, StageContext, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vidx=info".parse().unwrap())
        .add_directive("sqlx=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vidx-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    let queue_config = QueueConfig::from_env();
    let retry = RetryPolicy::from_queue_config(&queue_config);
    if config.stage_timeout > queue_config.visibility_timeout {
        info!(
            "Stages may outlast the {:?} visibility timeout; running jobs renew their lease every {:?}",
            queue_config.visibility_timeout,
            heartbeat_interval(queue_config.visibility_timeout)
        );
    }
    let queue = Arc::new(RedisJobQueue::new(queue_config)?);

    let store_config = StoreConfig::from_env();
    let store = Arc::new(PgMediaStore::connect(&store_config).await?);

    let embedder = build_embedder(&EmbedConfig::from_env())?;
    if embedder.dimension() != store_config.embedding_dim {
        anyhow::bail!(
            "embedder {} produces {}-dimensional vectors but the store expects {}",
            embedder.model_id(),
            embedder.dimension(),
            store_config.embedding_dim
        );
    }

    let media = Arc::new(FfmpegToolkit::new(MediaConfig::from_env()));

    if let Some(port) = std::env::var("WORKER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match metrics::init_metrics(addr) {
            Ok(()) => info!("Metrics exporter listening on {}", addr),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let ctx = StageContext::new(store, queue, media, embedder)
        .with_embed_batch_size(config.embed_batch_size);
    let executor = Arc::new(JobExecutor::new(config, ctx, retry));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    Ok(())
}
