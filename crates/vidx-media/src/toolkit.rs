//! The seam between stage handlers and external media tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vidx_models::VideoId;

use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::scenes::{self, SceneSpan};
use crate::subtitles::{self, SubtitleCue};

/// Media operations used by the pipeline stages.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn content_hash(&self, path: &Path) -> MediaResult<String>;

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Shots covering `[0, duration]`, in order.
    async fn detect_scenes(&self, path: &Path, duration: f64) -> MediaResult<Vec<SceneSpan>>;

    /// Write one frame at `at` seconds to `output`, keeping an existing file.
    async fn extract_keyframe(&self, path: &Path, at: f64, output: &Path) -> MediaResult<()>;

    /// Cues from a sidecar `.srt`, else from the best embedded track, else none.
    async fn load_subtitles(&self, path: &Path) -> MediaResult<Vec<SubtitleCue>>;

    fn keyframe_path(&self, video_id: VideoId, scene_index: i32) -> PathBuf;
}

/// [`MediaToolkit`] backed by ffmpeg and ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    config: MediaConfig,
}

impl FfmpegToolkit {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn content_hash(&self, path: &Path) -> MediaResult<String> {
        crate::hash::content_hash(path).await
    }

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path, self.config.probe_timeout).await
    }

    async fn detect_scenes(&self, path: &Path, duration: f64) -> MediaResult<Vec<SceneSpan>> {
        scenes::detect_scenes(
            path,
            duration,
            self.config.scene_threshold,
            self.config.min_scene_secs,
            self.config.scenedetect_timeout,
        )
        .await
    }

    async fn extract_keyframe(&self, path: &Path, at: f64, output: &Path) -> MediaResult<()> {
        scenes::extract_keyframe(path, at, output, self.config.keyframe_timeout).await
    }

    async fn load_subtitles(&self, path: &Path) -> MediaResult<Vec<SubtitleCue>> {
        let sidecar = subtitles::sidecar_path(path);
        if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
            info!("Using sidecar subtitles {}", sidecar.display());
            let text = tokio::fs::read_to_string(&sidecar).await?;
            return subtitles::parse_srt(&text);
        }

        let info = self.probe(path).await?;
        let Some(stream) = subtitles::choose_stream(&info.subtitle_streams) else {
            debug!("No subtitles for {}", path.display());
            return Ok(Vec::new());
        };

        info!(
            stream = stream.index,
            codec = %stream.codec,
            language = stream.language.as_deref().unwrap_or("und"),
            "Exporting embedded subtitles"
        );
        let scratch = self.config.keyframe_dir.join(".subs");
        match subtitles::export_srt(path, stream, &scratch, self.config.subtitle_timeout).await {
            Ok(text) => subtitles::parse_srt(&text),
            // Bitmap subtitle formats cannot be converted to text.
            Err(MediaError::FfmpegFailed { message, .. }) => {
                warn!("Subtitle export failed, continuing without captions: {}", message);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn keyframe_path(&self, video_id: VideoId, scene_index: i32) -> PathBuf {
        scenes::keyframe_path(&self.config.keyframe_dir, video_id, scene_index)
    }
}
