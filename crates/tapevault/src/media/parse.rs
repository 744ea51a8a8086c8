//! Parsers for ffmpeg/ffprobe output.

/// Lines of stderr kept when reporting a failure.
const STDERR_TAIL_LINES: usize = 5;
/// Upper bound on the stderr tail carried in errors and logs.
const MAX_STDERR_TAIL_BYTES: usize = 2048;

/// One frame-difference sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameScore {
    pub time_ms: i64,
    pub score: f64,
}

/// Last few non-empty stderr lines, byte capped on a char boundary.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.len() <= MAX_STDERR_TAIL_BYTES {
        return tail;
    }
    let mut cut = tail.len() - MAX_STDERR_TAIL_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail[cut..].to_string()
}

/// Parses `ffprobe -show_entries format=duration` output (seconds).
pub fn parse_probe_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parses the `Duration: HH:MM:SS.xx` banner ffmpeg prints to stderr.
pub fn parse_banner_duration(stderr: &str) -> Option<f64> {
    let rest = stderr.split("Duration: ").nth(1)?;
    let stamp = rest.split(',').next()?.trim();
    let mut parts = stamp.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Parses `metadata=print` output into time-ordered frame scores.
///
/// Expected shape, repeated per frame:
/// ```text
/// frame:12   pts:12012   pts_time:0.400400
/// lavfi.scene_score=0.053211
/// ```
pub fn parse_scene_scores(output: &str) -> Vec<FrameScore> {
    let mut scores = Vec::new();
    let mut pts_time: Option<f64> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(idx) = line.find("pts_time:") {
            pts_time = line[idx + "pts_time:".len()..]
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok());
        } else if let Some(value) = line.strip_prefix("lavfi.scene_score=") {
            if let (Some(t), Ok(score)) = (pts_time.take(), value.trim().parse::<f64>()) {
                if t.is_finite() && t >= 0.0 && score.is_finite() {
                    scores.push(FrameScore {
                        time_ms: (t * 1000.0).round() as i64,
                        score,
                    });
                }
            }
        }
    }

    scores.sort_by_key(|s| s.time_ms);
    scores
}
