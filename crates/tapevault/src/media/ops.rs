//! Composed tool operations used by the job tasks.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::args;
use super::error::ToolError;
use super::parse::{parse_banner_duration, parse_probe_duration, parse_scene_scores, FrameScore};
use super::tool::{MediaTool, Program};
use crate::config::{DetectorConfig, ToolsConfig};
use crate::sanitize::redact_path;

/// Container duration in seconds.
///
/// Uses ffprobe when present and falls back to the ffmpeg input banner.
/// `Ok(None)` means the tools ran but reported no usable duration.
pub async fn probe_duration(
    tool: &dyn MediaTool,
    input: &Path,
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Result<Option<f64>, ToolError> {
    match tool.check_available(Program::Ffprobe) {
        Ok(_) => {
            let output = tool
                .run(&args::probe_duration(input, tools.probe_timeout()), cancel)
                .await;
            match output {
                Ok(out) => {
                    if let Some(duration) = parse_probe_duration(&out.stdout) {
                        return Ok(Some(duration));
                    }
                }
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!(
                        event = "ffprobe_failed",
                        path = %redact_path(input),
                        error = %e,
                        "ffprobe failed, falling back to ffmpeg"
                    );
                }
            }
        }
        Err(_) => {
            warn!(
                event = "ffprobe_missing",
                path = %redact_path(input),
                "ffprobe not available, falling back to ffmpeg"
            );
        }
    }

    let out = tool
        .run(&args::banner_duration(input, tools.probe_timeout()), cancel)
        .await?;
    Ok(parse_banner_duration(&out.stderr))
}

/// Writes a poster frame to `output`.
pub async fn extract_thumbnail(
    tool: &dyn MediaTool,
    input: &Path,
    output: &Path,
    duration_seconds: Option<f64>,
    force: bool,
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Result<(), ToolError> {
    let seek_ms = args::thumbnail_seek_ms(duration_seconds);
    let invocation = args::thumbnail(input, output, seek_ms, force, tools.thumbnail_timeout());
    tool.run(&invocation, cancel).await?;
    Ok(())
}

/// Frame-difference signal for the whole input.
pub async fn frame_scores(
    tool: &dyn MediaTool,
    input: &Path,
    detector: &DetectorConfig,
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Result<Vec<FrameScore>, ToolError> {
    let invocation = args::scene_scores(input, detector.sample_fps, tools.analysis_timeout());
    let out = tool.run(&invocation, cancel).await?;
    Ok(parse_scene_scores(&out.stdout))
}
