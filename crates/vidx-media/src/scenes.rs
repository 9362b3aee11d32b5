//! Shot-boundary detection and keyframe extraction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vidx_models::VideoId;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// A contiguous shot, in seconds from the start of the video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneSpan {
    pub start: f64,
    pub end: f64,
}

impl SceneSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        self.start + self.duration() / 2.0
    }
}

/// Where the keyframe for scene `index` of `video_id` lives.
pub fn keyframe_path(dir: &Path, video_id: VideoId, index: i32) -> PathBuf {
    dir.join(video_id.to_string())
        .join(format!("scene_{:04}_keyframe.jpg", index))
}

/// Pull cut timestamps out of ffmpeg `showinfo` log lines.
pub fn parse_showinfo_pts(stderr: &str) -> Vec<f64> {
    let mut cuts: Vec<f64> = stderr
        .lines()
        .filter(|line| line.contains("showinfo"))
        .filter_map(|line| {
            let rest = &line[line.find("pts_time:")? + "pts_time:".len()..];
            rest.split_whitespace().next()?.parse::<f64>().ok()
        })
        .filter(|t| t.is_finite() && *t > 0.0)
        .collect();
    cuts.sort_by(|a, b| a.total_cmp(b));
    cuts.dedup();
    cuts
}

/// Turn cut points into spans covering `[0, duration]`.
///
/// A span shorter than `min_len` is folded into the one before it; a short
/// first span is folded into the next. Without cuts the whole video is one
/// span.
pub fn build_spans(cuts: &[f64], duration: f64, min_len: f64) -> Vec<SceneSpan> {
    if duration <= 0.0 {
        return Vec::new();
    }

    let mut bounds = vec![0.0];
    bounds.extend(cuts.iter().copied().filter(|c| *c > 0.0 && *c < duration));
    bounds.push(duration);

    let mut spans: Vec<SceneSpan> = Vec::with_capacity(bounds.len());
    for pair in bounds.windows(2) {
        let span = SceneSpan::new(pair[0], pair[1]);
        match spans.last_mut() {
            Some(prev) if span.duration() < min_len || prev.duration() < min_len => {
                prev.end = span.end;
            }
            _ => spans.push(span),
        }
    }
    spans
}

/// Run ffmpeg's scene-change filter over `input`.
pub async fn detect_scenes(
    input: &Path,
    duration: f64,
    threshold: f64,
    min_len: f64,
    timeout: Duration,
) -> MediaResult<Vec<SceneSpan>> {
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let cmd = FfmpegCommand::analyze(input)
        .log_level("info")
        .video_filter(format!("select='gt(scene,{})',showinfo", threshold));

    let stderr = FfmpegRunner::new().with_timeout(timeout).run(&cmd).await?;
    let cuts = parse_showinfo_pts(&stderr);
    let spans = build_spans(&cuts, duration, min_len);

    info!(
        cuts = cuts.len(),
        scenes = spans.len(),
        "Detected scenes in {}",
        input.display()
    );
    Ok(spans)
}

/// Grab one JPEG at `at` seconds. An existing file is kept as is.
pub async fn extract_keyframe(
    input: &Path,
    at: f64,
    output: &Path,
    timeout: Duration,
) -> MediaResult<()> {
    if tokio::fs::try_exists(output).await.unwrap_or(false) {
        debug!("Keyframe already present: {}", output.display());
        return Ok(());
    }
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = FfmpegCommand::new(input, output)
        .seek(at.max(0.0))
        .single_frame()
        .jpeg_quality(2);
    FfmpegRunner::new().with_timeout(timeout).run(&cmd).await?;

    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        return Err(MediaError::ffmpeg_failed(
            format!("no frame written at {:.3}s", at),
            None,
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDERR: &str = "\
[Parsed_showinfo_1 @ 0x55d] config in time_base: 1/12800, frame_rate: 25/1
[Parsed_showinfo_1 @ 0x55d] n:   0 pts: 160256 pts_time:12.52   duration:    512 fmt:yuv420p
[Parsed_showinfo_1 @ 0x55d] n:   1 pts: 400000 pts_time:31.25   duration:    512 fmt:yuv420p
[Parsed_showinfo_1 @ 0x55d] n:   2 pts: 409600 pts_time:32      duration:    512 fmt:yuv420p
frame=    3 fps=0.0 q=-0.0 Lsize=N/A time=00:00:32.00";

    #[test]
    fn test_parse_showinfo_pts() {
        assert_eq!(parse_showinfo_pts(STDERR), vec![12.52, 31.25, 32.0]);
        assert!(parse_showinfo_pts("nothing here").is_empty());
    }

    #[test]
    fn test_build_spans_merges_short_shots() {
        let spans = build_spans(&[12.52, 31.25, 32.0], 60.0, 1.0);
        assert_eq!(
            spans,
            vec![
                SceneSpan::new(0.0, 12.52),
                SceneSpan::new(12.52, 32.0),
                SceneSpan::new(32.0, 60.0),
            ]
        );
    }

    #[test]
    fn test_build_spans_without_cuts() {
        assert_eq!(build_spans(&[], 42.0, 1.0), vec![SceneSpan::new(0.0, 42.0)]);
        assert!(build_spans(&[], 0.0, 1.0).is_empty());
    }

    #[test]
    fn test_build_spans_short_first_shot() {
        let spans = build_spans(&[0.4, 10.0], 20.0, 1.0);
        assert_eq!(spans, vec![SceneSpan::new(0.0, 10.0), SceneSpan::new(10.0, 20.0)]);
    }

    #[test]
    fn test_build_spans_ignores_out_of_range_cuts() {
        let spans = build_spans(&[5.0, 25.0], 20.0, 0.0);
        assert_eq!(spans, vec![SceneSpan::new(0.0, 5.0), SceneSpan::new(5.0, 20.0)]);
    }

    #[test]
    fn test_keyframe_path_layout() {
        let path = keyframe_path(Path::new("/data/kf"), VideoId(7), 3);
        assert_eq!(path, PathBuf::from("/data/kf/7/scene_0003_keyframe.jpg"));
    }

    #[test]
    fn test_span_midpoint() {
        assert!((SceneSpan::new(10.0, 20.0).midpoint() - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_existing_keyframe_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("kf.jpg");
        std::fs::write(&out, b"jpeg").unwrap();
        extract_keyframe(Path::new("/missing.mp4"), 1.0, &out, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"jpeg");
    }
}
