//! embedding_generation: visual and text vectors per scene.

use std::path::PathBuf;

use vidx_embed::TextMode;
use vidx_models::{Job, Scene, VideoStatus};
use vidx_store::VideoPatch;

use super::StageContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

pub async fn generate_embeddings(
    ctx: &StageContext,
    job: &Job,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let video = ctx.load_video(job.video_id()).await?;
    let scenes = ctx.store.scenes_for_video(video.id).await?;
    if scenes.is_empty() {
        return Err(WorkerError::validation(format!(
            "video {} has no scenes to embed",
            video.id
        )));
    }

    let pending: Vec<&Scene> = scenes.iter().filter(|s| !s.has_embeddings()).collect();
    logger.log_start(&format!(
        "embedding {} of {} scenes with {}",
        pending.len(),
        scenes.len(),
        ctx.embedder.model_id()
    ));

    // An empty caption still gets a text vector, taken from the title.
    let fallback = video.display_title().to_string();

    let total = pending.len();
    let mut done = 0usize;
    for batch in pending.chunks(ctx.embed_batch_size) {
        let texts: Vec<String> = batch
            .iter()
            .map(|s| match s.caption.as_deref().map(str::trim) {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => fallback.clone(),
            })
            .collect();
        let keyframes = batch
            .iter()
            .map(|s| {
                s.keyframe_path.as_ref().map(PathBuf::from).ok_or_else(|| {
                    WorkerError::validation(format!(
                        "scene {} has no keyframe; scene detection has not finished",
                        s.scene_index
                    ))
                })
            })
            .collect::<WorkerResult<Vec<PathBuf>>>()?;

        let (text_vecs, visual_vecs) = futures_util::try_join!(
            ctx.embedder.embed_texts(&texts, TextMode::Passage),
            ctx.embedder.embed_images(&keyframes),
        )?;
        if text_vecs.len() != batch.len() || visual_vecs.len() != batch.len() {
            return Err(WorkerError::stage_failed(format!(
                "embedder returned {} text and {} visual vectors for {} scenes",
                text_vecs.len(),
                visual_vecs.len(),
                batch.len()
            )));
        }

        for ((scene, text), visual) in batch.iter().zip(&text_vecs).zip(&visual_vecs) {
            ctx.store
                .set_scene_embeddings(scene.id, visual, text)
                .await?;
        }

        done += batch.len();
        let percent = 5 + (done * 90 / total.max(1)) as u8;
        ctx.progress(job, logger, percent, &format!("embedded {}/{}", done, total))
            .await;
    }

    let model = ctx.embedder.model_id();
    if total > 0 && video.embedding_model.as_deref() != Some(model) {
        ctx.store
            .update_video(video.id, VideoPatch::default().with_embedding_model(model))
            .await?;
    }

    if ctx.store.complete_if_embedded(video.id).await? {
        logger.log_completion("video completed");
        return Ok(());
    }

    let current = ctx.load_video(video.id).await?;
    if current.status != VideoStatus::Completed {
        // Scenes were replaced while this stage ran.
        return Err(WorkerError::stage_failed(format!(
            "video {} still has scenes without embeddings",
            video.id
        )));
    }
    logger.log_completion("video was already completed");
    Ok(())
}
