//! scene_detection: shots and keyframes.

use vidx_media::{MediaError, SceneSpan};
use vidx_models::{Job, NewScene};

use super::{source_path, StageContext};
use crate::error::WorkerResult;
use crate::logging::JobLogger;

pub async fn detect_scenes(ctx: &StageContext, job: &Job, logger: &JobLogger) -> WorkerResult<()> {
    let video = ctx.load_video(job.video_id()).await?;
    let path = source_path(&video)?;

    let mut scenes = ctx.store.scenes_for_video(video.id).await?;
    if scenes.is_empty() {
        let duration = if video.duration > 0.0 {
            video.duration
        } else {
            ctx.media.probe(&path).await?.duration
        };
        if duration <= 0.0 {
            return Err(MediaError::invalid_video("video has no measurable duration").into());
        }

        logger.log_start(&format!("detecting shots over {:.1}s", duration));
        let spans: Vec<SceneSpan> = ctx.media.detect_scenes(&path, duration).await?;
        if spans.is_empty() {
            return Err(MediaError::invalid_video("no shots detected").into());
        }

        let new_scenes: Vec<NewScene> = spans
            .iter()
            .enumerate()
            .map(|(i, span)| NewScene {
                scene_index: i as i32,
                start_time: span.start,
                end_time: span.end,
                keyframe_path: None,
            })
            .collect();
        scenes = ctx.store.upsert_scenes(video.id, &new_scenes).await?;
        ctx.progress(job, logger, 30, &format!("{} scenes recorded", scenes.len()))
            .await;
    } else {
        logger.log_start(&format!(
            "{} scenes already recorded, checking keyframes",
            scenes.len()
        ));
    }

    let total = scenes.len();
    let mut extracted = 0usize;
    for (done, scene) in scenes.iter().enumerate() {
        let target = ctx.media.keyframe_path(video.id, scene.scene_index);
        let present = match &scene.keyframe_path {
            Some(p) => tokio::fs::try_exists(p).await.unwrap_or(false),
            None => false,
        };
        if present {
            continue;
        }

        let midpoint = scene.start_time + scene.duration() / 2.0;
        ctx.media.extract_keyframe(&path, midpoint, &target).await?;
        ctx.store
            .set_scene_keyframe(scene.id, &target.to_string_lossy())
            .await?;
        extracted += 1;

        let percent = 30 + ((done + 1) * 65 / total.max(1)) as u8;
        if (done + 1) % 10 == 0 || done + 1 == total {
            ctx.progress(job, logger, percent, &format!("keyframes {}/{}", done + 1, total))
                .await;
        }
    }

    logger.log_completion(&format!(
        "{} scenes, {} keyframes extracted",
        total, extracted
    ));
    Ok(())
}
