//! Subtitle discovery, export and SRT parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::SubtitleStream;

/// One timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end && self.end > start
    }

    /// Cue text without markup, whitespace collapsed to single spaces.
    pub fn plain_text(&self) -> String {
        strip_tags(&self.text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too).
fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    let (hms, millis) = s.rsplit_once([',', '.']).unwrap_or((s, "0"));
    let mut parts = hms.split(':');
    let h: f64 = parts.next()?.trim().parse().ok()?;
    let m: f64 = parts.next()?.trim().parse().ok()?;
    let sec: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let frac: f64 = format!("0.{}", millis.trim()).parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec + frac)
}

fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once("-->")?;
    // Position hints such as `X1:40` may follow the end time.
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Parse SubRip text into cues. Blocks without a valid timing line are
/// skipped; input with no valid block at all is an error unless it is blank.
pub fn parse_srt(input: &str) -> MediaResult<Vec<SubtitleCue>> {
    let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();
    let mut blocks = 0usize;

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            continue;
        }
        blocks += 1;

        let Some(timing_at) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        let Some((start, end)) = parse_timing(lines[timing_at]) else {
            continue;
        };

        let index = timing_at
            .checked_sub(1)
            .and_then(|i| lines[i].trim().parse().ok())
            .unwrap_or(cues.len() as u32 + 1);
        let text = lines[timing_at + 1..]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join("\n");

        cues.push(SubtitleCue {
            index,
            start,
            end,
            text,
        });
    }

    if cues.is_empty() && blocks > 0 {
        return Err(MediaError::InvalidSubtitles(
            "no parsable SRT cues".to_string(),
        ));
    }
    Ok(cues)
}

/// Drop `<i>`-style markup and `{\an8}`-style override blocks.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth_angle = false;
    let mut depth_brace = false;
    for c in text.chars() {
        match c {
            '<' => depth_angle = true,
            '>' if depth_angle => depth_angle = false,
            '{' => depth_brace = true,
            '}' if depth_brace => depth_brace = false,
            _ if depth_angle || depth_brace => {}
            _ => out.push(c),
        }
    }
    out
}

/// Text of every cue overlapping `[start, end)`, in cue order, as one line.
pub fn caption_for_range(cues: &[SubtitleCue], start: f64, end: f64) -> String {
    cues.iter()
        .filter(|c| c.overlaps(start, end))
        .map(SubtitleCue::plain_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<dir>/<stem>.srt` next to the video.
pub fn sidecar_path(video: &Path) -> PathBuf {
    video.with_extension("srt")
}

/// English SubRip first, then any English track, then whatever comes first.
pub fn choose_stream(streams: &[SubtitleStream]) -> Option<&SubtitleStream> {
    streams
        .iter()
        .find(|s| s.is_english() && s.codec == "subrip")
        .or_else(|| streams.iter().find(|s| s.is_english()))
        .or_else(|| streams.first())
}

/// Convert an embedded subtitle stream to SRT text.
pub async fn export_srt(
    input: &Path,
    stream: &SubtitleStream,
    scratch_dir: &Path,
    timeout: Duration,
) -> MediaResult<String> {
    tokio::fs::create_dir_all(scratch_dir).await?;
    let output = scratch_dir.join(format!("subs_{}.srt", stream.index));

    let cmd = FfmpegCommand::new(input, &output)
        .map_stream(stream.index)
        .subtitle_codec("srt");
    FfmpegRunner::new().with_timeout(timeout).run(&cmd).await?;

    let text = tokio::fs::read_to_string(&output).await?;
    if let Err(e) = tokio::fs::remove_file(&output).await {
        debug!("Could not remove {}: {}", output.display(), e);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "\u{feff}1\r\n00:00:01,000 --> 00:00:04,500\r\n<i>The car</i> speeds\r\naway.\r\n\r\n2\r\n00:00:05.250 --> 00:00:07,000 X1:40\r\nA chase begins!\r\n\r\n3\r\n00:01:02,000 --> 00:01:03,000\r\n{\\an8}Sirens\r\n";

    #[test]
    fn test_parse_srt() {
        let cues = parse_srt(SRT).unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].index, 1);
        assert!((cues[0].start - 1.0).abs() < 1e-9);
        assert!((cues[0].end - 4.5).abs() < 1e-9);
        assert_eq!(cues[0].text, "<i>The car</i> speeds\naway.");
        assert!((cues[1].start - 5.25).abs() < 1e-9);
        assert!((cues[2].start - 62.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_srt_rejects_garbage() {
        assert!(parse_srt("not a subtitle file").is_err());
        assert!(parse_srt("   \n\n").unwrap().is_empty());
    }

    #[test]
    fn test_caption_for_range() {
        let cues = parse_srt(SRT).unwrap();
        assert_eq!(
            caption_for_range(&cues, 0.0, 6.0),
            "The car speeds away. A chase begins!"
        );
        assert_eq!(caption_for_range(&cues, 60.0, 70.0), "Sirens");
        assert_eq!(caption_for_range(&cues, 10.0, 20.0), "");
        // Touching at the boundary is not an overlap.
        assert_eq!(caption_for_range(&cues, 4.5, 5.0), "");
    }

    #[test]
    fn test_choose_stream() {
        let s = |index, codec: &str, lang: Option<&str>| SubtitleStream {
            index,
            codec: codec.to_string(),
            language: lang.map(str::to_string),
        };
        let streams = vec![
            s(2, "subrip", Some("fre")),
            s(3, "ass", Some("eng")),
            s(4, "subrip", Some("en")),
        ];
        assert_eq!(choose_stream(&streams).unwrap().index, 4);
        assert_eq!(choose_stream(&streams[..2]).unwrap().index, 3);
        assert_eq!(choose_stream(&streams[..1]).unwrap().index, 2);
        assert!(choose_stream(&[]).is_none());
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/media/movie.final.mkv")),
            PathBuf::from("/media/movie.final.srt")
        );
    }
}
