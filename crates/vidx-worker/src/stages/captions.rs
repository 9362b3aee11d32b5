//! caption_extraction: subtitle text per scene.

use vidx_media::{caption_for_range, SubtitleCue};
use vidx_models::{Job, NewCaption, Scene, DEFAULT_CAPTION_LANGUAGE};

use super::{source_path, StageContext};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Metadata key under which ingestion records the subtitle track language.
pub(crate) const SUBTITLE_LANGUAGE_KEY: &str = "subtitle_language";

pub async fn extract_captions(ctx: &StageContext, job: &Job, logger: &JobLogger) -> WorkerResult<()> {
    let video = ctx.load_video(job.video_id()).await?;
    let scenes = ctx.store.scenes_for_video(video.id).await?;
    if scenes.is_empty() {
        return Err(WorkerError::validation(format!(
            "video {} has no scenes to caption",
            video.id
        )));
    }

    let pending: Vec<_> = scenes.iter().filter(|s| s.caption.is_none()).collect();
    if pending.is_empty() {
        logger.log_completion("all scenes already captioned");
        return Ok(());
    }

    let path = source_path(&video)?;
    logger.log_start(&format!("captioning {} scenes", pending.len()));
    let cues = ctx.media.load_subtitles(&path).await?;
    if cues.is_empty() {
        logger.log_warning("no subtitles found, captions will be empty");
    }
    ctx.progress(job, logger, 30, &format!("{} subtitle cues loaded", cues.len()))
        .await;

    let language = video
        .metadata
        .get(SUBTITLE_LANGUAGE_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_CAPTION_LANGUAGE);
    let stored = ctx
        .store
        .replace_captions(video.id, &caption_rows(&cues, &scenes, language))
        .await?;
    ctx.progress(job, logger, 50, &format!("{} cues stored", stored))
        .await;

    let mut non_empty = 0usize;
    for scene in &pending {
        let caption = caption_for_range(&cues, scene.start_time, scene.end_time);
        if !caption.is_empty() {
            non_empty += 1;
        }
        ctx.store.set_scene_caption(scene.id, &caption).await?;
    }

    logger.log_completion(&format!(
        "{} captions written, {} with text",
        pending.len(),
        non_empty
    ));
    Ok(())
}

/// One row per cue with text, linked to the scene holding its start time,
/// or failing that the first scene it overlaps.
fn caption_rows(cues: &[SubtitleCue], scenes: &[Scene], language: &str) -> Vec<NewCaption> {
    cues.iter()
        .filter_map(|cue| {
            let text = cue.plain_text();
            if text.is_empty() {
                return None;
            }
            let scene = scenes
                .iter()
                .find(|s| s.start_time <= cue.start && cue.start < s.end_time)
                .or_else(|| scenes.iter().find(|s| cue.overlaps(s.start_time, s.end_time)));
            let row = NewCaption::new(cue.start, cue.end, text).with_language(language);
            Some(match scene {
                Some(s) => row.in_scene(s.id),
                None => row,
            })
        })
        .collect()
}
