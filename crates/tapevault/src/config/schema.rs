use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root of the on-disk layout. Defaults to `~/.tapevault`.
    #[serde(default)]
    pub project_root: Option<String>,
    /// Directory that receives a copy of every ingested raw file.
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub export: ExportProfile,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            project_root: None,
            backup_dir: None,
            tools: ToolsConfig::default(),
            detector: DetectorConfig::default(),
            export: ExportProfile::default(),
            jobs: JobsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Explicit ffmpeg binary; otherwise resolved from `PATH`.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default)]
    pub ffprobe_path: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_thumbnail_timeout")]
    pub thumbnail_timeout_secs: u64,
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    20
}

fn default_thumbnail_timeout() -> u64 {
    60
}

fn default_analysis_timeout() -> u64 {
    900
}

fn default_export_timeout() -> u64 {
    1800
}

impl ToolsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_secs(self.thumbnail_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            probe_timeout_secs: default_probe_timeout(),
            thumbnail_timeout_secs: default_thumbnail_timeout(),
            analysis_timeout_secs: default_analysis_timeout(),
            export_timeout_secs: default_export_timeout(),
        }
    }
}

/// Scene boundary detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Frame-difference score a sample must exceed to become a candidate.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Minimum distance between two kept boundaries.
    #[serde(default = "default_min_segment_seconds")]
    pub min_segment_seconds: f64,
    /// Analyse at this frame rate instead of every frame.
    #[serde(default)]
    pub sample_fps: Option<f64>,
}

fn default_threshold() -> f64 {
    0.35
}

fn default_min_segment_seconds() -> f64 {
    90.0
}

impl DetectorConfig {
    pub fn min_segment_ms(&self) -> i64 {
        (self.min_segment_seconds * 1000.0).round() as i64
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_segment_seconds: default_min_segment_seconds(),
            sample_fps: None,
        }
    }
}

/// Re-encode settings used when a stream copy fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportProfile {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    20
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "160k".to_string()
}

impl Default for ExportProfile {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Minimum interval between progress writes to the job table.
    #[serde(default = "default_progress_flush_ms")]
    pub progress_flush_ms: u64,
}

fn default_progress_flush_ms() -> u64 {
    1000
}

impl JobsConfig {
    pub fn progress_flush_interval(&self) -> Duration {
        Duration::from_millis(self.progress_flush_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            progress_flush_ms: default_progress_flush_ms(),
        }
    }
}
