//! Media tooling configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// ffmpeg scene-change score above which a frame starts a new shot
    pub scene_threshold: f64,
    /// Shots shorter than this are merged into their predecessor
    pub min_scene_secs: f64,
    pub scenedetect_timeout: Duration,
    pub keyframe_timeout: Duration,
    pub subtitle_timeout: Duration,
    pub probe_timeout: Duration,
    /// Root directory for extracted keyframes
    pub keyframe_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            scene_threshold: 0.3,
            min_scene_secs: 1.0,
            scenedetect_timeout: Duration::from_secs(300),
            keyframe_timeout: Duration::from_secs(30),
            subtitle_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(60),
            keyframe_dir: PathBuf::from("data/keyframes"),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|v: &u64| *v > 0)
            .unwrap_or(default),
    )
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scene_threshold: std::env::var("SCENE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| *v > 0.0 && *v < 1.0)
                .unwrap_or(defaults.scene_threshold),
            min_scene_secs: std::env::var("MIN_SCENE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| *v >= 0.0)
                .unwrap_or(defaults.min_scene_secs),
            scenedetect_timeout: secs_from_env("SCENEDETECT_TIMEOUT_SECS", 300),
            keyframe_timeout: secs_from_env("KEYFRAME_TIMEOUT_SECS", 30),
            subtitle_timeout: secs_from_env("SUBTITLE_TIMEOUT_SECS", 120),
            probe_timeout: secs_from_env("PROBE_TIMEOUT_SECS", 60),
            keyframe_dir: std::env::var("KEYFRAME_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.keyframe_dir),
        }
    }
}
