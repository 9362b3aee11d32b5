//! video_ingestion: hash, dedup, probe.

use serde_json::json;
use vidx_models::{Job, VideoStatus};
use vidx_store::{StoreError, VideoPatch};

use super::captions::SUBTITLE_LANGUAGE_KEY;
use super::{source_path, StageContext};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

pub async fn ingest_video(ctx: &StageContext, job: &Job, logger: &JobLogger) -> WorkerResult<()> {
    let video = ctx.load_video(job.video_id()).await?;
    let path = source_path(&video)?;
    logger.log_start(&format!("ingesting {}", path.display()));

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| vidx_media::MediaError::FileNotFound(path.clone()))?;
    if !metadata.is_file() {
        return Err(vidx_media::MediaError::invalid_video(format!(
            "{} is not a regular file",
            path.display()
        ))
        .into());
    }
    ctx.progress(job, logger, 10, "file verified").await;

    let hash = ctx.media.content_hash(&path).await?;
    match ctx.store.set_content_hash(video.id, &hash).await {
        Ok(()) => {}
        Err(StoreError::DuplicateContent { existing_video_id }) => {
            return Err(WorkerError::Duplicate {
                existing: existing_video_id,
            })
        }
        Err(e) => return Err(e.into()),
    }
    ctx.progress(job, logger, 40, "content hash recorded").await;

    let info = ctx.media.probe(&path).await?;
    ctx.progress(job, logger, 80, "container probed").await;

    let patch = VideoPatch::status(VideoStatus::Processing)
        .with_duration(info.duration)
        .clear_error()
        .with_metadata("width", json!(info.width))
        .with_metadata("height", json!(info.height))
        .with_metadata("fps", json!(info.fps))
        .with_metadata("codec", json!(info.codec))
        .with_metadata("container", json!(info.format))
        .with_metadata("file_size", json!(info.size.max(metadata.len())))
        .with_metadata("bitrate", json!(info.bitrate))
        .with_metadata("subtitle_tracks", json!(info.subtitle_streams.len()));
    let language = vidx_media::subtitles::choose_stream(&info.subtitle_streams)
        .and_then(|stream| stream.language.clone());
    let patch = match language {
        Some(language) => patch.with_metadata(SUBTITLE_LANGUAGE_KEY, json!(language)),
        None => patch,
    };
    ctx.store.update_video(video.id, patch).await?;

    logger.log_completion(&format!(
        "{:.1}s {}x{} {}",
        info.duration, info.width, info.height, info.codec
    ));
    Ok(())
}
