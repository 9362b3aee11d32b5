//! FFmpeg tooling for the ingestion pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with timeouts
//! - Container probing via ffprobe
//! - Shot-boundary detection and keyframe extraction
//! - Subtitle discovery, export and SRT parsing
//! - Streaming content hashing
//!
//! Stage handlers talk to all of it through [`MediaToolkit`].

pub mod command;
pub mod config;
pub mod error;
pub mod hash;
pub mod probe;
pub mod scenes;
pub mod subtitles;
pub mod toolkit;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::MediaConfig;
pub use error::{MediaError, MediaResult};
pub use hash::content_hash;
pub use probe::{probe_video, SubtitleStream, VideoInfo};
pub use scenes::{keyframe_path, SceneSpan};
pub use subtitles::{caption_for_range, parse_srt, SubtitleCue};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
