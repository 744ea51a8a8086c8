//! Command-line construction for each tool operation.

use std::path::Path;
use std::time::Duration;

use super::tool::ToolInvocation;
use crate::config::ExportProfile;

/// Builder for an ffmpeg argument list: `[global] [input args] -i input [output args] output`.
#[derive(Debug, Clone)]
pub struct FfmpegArgs {
    input: String,
    output: String,
    input_args: Vec<String>,
    output_args: Vec<String>,
    overwrite: bool,
}

impl FfmpegArgs {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_string_lossy().into_owned(),
            output: output.as_ref().to_string_lossy().into_owned(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Fail instead of replacing an existing output (`-n`).
    pub fn no_overwrite(mut self) -> Self {
        self.overwrite = false;
        self
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Input-side seek.
    pub fn seek_ms(self, ms: i64) -> Self {
        self.input_arg("-ss").input_arg(format_seconds(ms))
    }

    /// Output duration.
    pub fn duration_ms(self, ms: i64) -> Self {
        self.output_arg("-t").output_arg(format_seconds(ms))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            if self.overwrite { "-y" } else { "-n" }.to_string(),
        ];
        args.extend(self.input_args);
        args.push("-i".to_string());
        args.push(self.input);
        args.extend(self.output_args);
        args.push(self.output);
        args
    }
}

/// Milliseconds as ffmpeg seconds with millisecond precision.
pub fn format_seconds(ms: i64) -> String {
    let ms = ms.max(0);
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Seek position for the poster frame: 10% in, clamped to [1s, 30s].
pub fn thumbnail_seek_ms(duration_seconds: Option<f64>) -> i64 {
    let secs = match duration_seconds {
        Some(d) if d.is_finite() && d > 0.0 => (d * 0.1).clamp(1.0, 30.0),
        _ => 1.0,
    };
    (secs * 1000.0).round() as i64
}

/// `ffprobe` container duration in seconds on stdout.
pub fn probe_duration(input: &Path, timeout: Duration) -> ToolInvocation {
    ToolInvocation::ffprobe(
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            input.to_string_lossy().into_owned(),
        ],
        timeout,
    )
}

/// Decode-only ffmpeg pass whose stderr banner carries the duration.
pub fn banner_duration(input: &Path, timeout: Duration) -> ToolInvocation {
    ToolInvocation::ffmpeg(
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-t".to_string(),
            "0".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ],
        timeout,
    )
}

/// Single 640px-wide JPEG frame.
pub fn thumbnail(
    input: &Path,
    output: &Path,
    seek_ms: i64,
    force: bool,
    timeout: Duration,
) -> ToolInvocation {
    let mut builder = FfmpegArgs::new(input, output)
        .seek_ms(seek_ms)
        .output_arg("-frames:v")
        .output_arg("1")
        .video_filter("scale=640:-2");
    if !force {
        builder = builder.no_overwrite();
    }
    ToolInvocation::ffmpeg(builder.build(), timeout)
}

/// Per-frame scene-change scores printed to stdout.
pub fn scene_scores(input: &Path, sample_fps: Option<f64>, timeout: Duration) -> ToolInvocation {
    let select = "select='gte(scene,0)',metadata=print:file=-";
    let filter = match sample_fps {
        Some(fps) => format!("fps={},{}", fps, select),
        None => select.to_string(),
    };
    let args = FfmpegArgs::new(input, "-")
        .output_arg("-an")
        .output_arg("-sn")
        .video_filter(filter)
        .format("null")
        .build();
    ToolInvocation::ffmpeg(args, timeout)
}

/// Stream-copy `[start_ms, end_ms)` into an MP4.
pub fn stream_copy(
    input: &Path,
    output: &Path,
    start_ms: i64,
    end_ms: i64,
    timeout: Duration,
) -> ToolInvocation {
    let args = FfmpegArgs::new(input, output)
        .seek_ms(start_ms)
        .duration_ms(end_ms - start_ms)
        .output_arg("-map")
        .output_arg("0:v:0")
        .output_arg("-map")
        .output_arg("0:a?")
        .output_arg("-c")
        .output_arg("copy")
        .output_arg("-avoid_negative_ts")
        .output_arg("make_zero")
        .output_arg("-movflags")
        .output_arg("+faststart")
        .format("mp4")
        .build();
    ToolInvocation::ffmpeg(args, timeout)
}

/// Re-encode `[start_ms, end_ms)` with the export profile.
pub fn reencode(
    input: &Path,
    output: &Path,
    start_ms: i64,
    end_ms: i64,
    profile: &ExportProfile,
    timeout: Duration,
) -> ToolInvocation {
    let args = FfmpegArgs::new(input, output)
        .seek_ms(start_ms)
        .duration_ms(end_ms - start_ms)
        .output_arg("-map")
        .output_arg("0:v:0")
        .output_arg("-map")
        .output_arg("0:a?")
        .output_arg("-c:v")
        .output_arg(profile.video_codec.clone())
        .output_arg("-preset")
        .output_arg(profile.preset.clone())
        .output_arg("-crf")
        .output_arg(profile.crf.to_string())
        .output_arg("-c:a")
        .output_arg(profile.audio_codec.clone())
        .output_arg("-b:a")
        .output_arg(profile.audio_bitrate.clone())
        .output_arg("-movflags")
        .output_arg("+faststart")
        .format("mp4")
        .build();
    ToolInvocation::ffmpeg(args, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Program;

    fn window(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0), "0.000");
        assert_eq!(format_seconds(1500), "1.500");
        assert_eq!(format_seconds(3_723_004), "3723.004");
        assert_eq!(format_seconds(-5), "0.000");
    }

    #[test]
    fn test_thumbnail_seek_clamped() {
        assert_eq!(thumbnail_seek_ms(None), 1000);
        assert_eq!(thumbnail_seek_ms(Some(5.0)), 1000);
        assert_eq!(thumbnail_seek_ms(Some(120.0)), 12_000);
        assert_eq!(thumbnail_seek_ms(Some(7200.0)), 30_000);
    }

    #[test]
    fn test_stream_copy_args() {
        let inv = stream_copy(
            Path::new("/raw/a.mp4"),
            Path::new("/out/segment_1.mp4.partial"),
            90_000,
            150_500,
            Duration::from_secs(10),
        );
        assert_eq!(inv.program, Program::Ffmpeg);
        assert_eq!(window(&inv.args, "-ss").as_deref(), Some("90.000"));
        assert_eq!(window(&inv.args, "-t").as_deref(), Some("60.500"));
        assert_eq!(window(&inv.args, "-c").as_deref(), Some("copy"));
        assert_eq!(window(&inv.args, "-f").as_deref(), Some("mp4"));
        assert_eq!(
            inv.args.last().map(String::as_str),
            Some("/out/segment_1.mp4.partial")
        );
        // Seek precedes the input for fast keyframe seeking.
        let ss = inv.args.iter().position(|a| a == "-ss").unwrap();
        let i = inv.args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
    }

    #[test]
    fn test_reencode_uses_profile() {
        let profile = ExportProfile {
            crf: 18,
            preset: "slow".to_string(),
            ..ExportProfile::default()
        };
        let inv = reencode(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            0,
            1000,
            &profile,
            Duration::from_secs(10),
        );
        assert_eq!(window(&inv.args, "-c:v").as_deref(), Some("libx264"));
        assert_eq!(window(&inv.args, "-crf").as_deref(), Some("18"));
        assert_eq!(window(&inv.args, "-preset").as_deref(), Some("slow"));
        assert_eq!(window(&inv.args, "-b:a").as_deref(), Some("160k"));
    }

    #[test]
    fn test_thumbnail_overwrite_flag() {
        let inv = thumbnail(
            Path::new("in.mp4"),
            Path::new("t.jpg"),
            1000,
            false,
            Duration::from_secs(60),
        );
        assert!(inv.args.contains(&"-n".to_string()));
        assert_eq!(window(&inv.args, "-vf").as_deref(), Some("scale=640:-2"));

        let forced = thumbnail(
            Path::new("in.mp4"),
            Path::new("t.jpg"),
            1000,
            true,
            Duration::from_secs(60),
        );
        assert!(forced.args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_scene_scores_sampling() {
        let inv = scene_scores(Path::new("in.mp4"), Some(5.0), Duration::from_secs(90));
        let vf = window(&inv.args, "-vf").unwrap();
        assert!(vf.starts_with("fps=5,"));
        assert!(vf.contains("metadata=print:file=-"));
        assert_eq!(inv.args.last().map(String::as_str), Some("-"));

        let probe = probe_duration(Path::new("in.mp4"), Duration::from_secs(20));
        assert_eq!(probe.program, Program::Ffprobe);
    }
}
