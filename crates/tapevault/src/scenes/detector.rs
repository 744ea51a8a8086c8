//! Deterministic boundary detection.
//!
//! A sample is a candidate when its score exceeds the threshold and it lies
//! strictly inside `(0, end)`. Candidates are walked in time order and one
//! that falls closer than `min_segment_ms` to the previously kept boundary
//! (or to `0`) is dropped, so of two close candidates the earlier survives.
//! A last boundary closer than `min_segment_ms` to `end` is dropped too. The
//! kept boundaries together with `0` and `end` delimit the suggested
//! segments, so only a tape shorter than `min_segment_ms` yields a segment
//! below that length.

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::media::FrameScore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub threshold: f64,
    pub min_segment_ms: i64,
}

impl From<&DetectorConfig> for DetectorParams {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_segment_ms: config.min_segment_ms(),
        }
    }
}

/// A kept cut point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub time_ms: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    /// Score of the boundary that opens the segment; `None` for the first one.
    pub confidence: Option<f64>,
}

fn sorted(samples: &[FrameScore]) -> Vec<FrameScore> {
    let mut samples = samples.to_vec();
    samples.sort_by_key(|s| s.time_ms);
    samples
}

/// Kept boundaries strictly inside `(0, end_ms)`.
pub fn detect_boundaries(
    samples: &[FrameScore],
    end_ms: i64,
    params: &DetectorParams,
) -> Vec<Boundary> {
    let mut kept: Vec<Boundary> = Vec::new();

    for sample in sorted(samples) {
        let below = sample.score.is_nan() || sample.score <= params.threshold;
        if below || sample.time_ms <= 0 || sample.time_ms >= end_ms {
            continue;
        }
        let last_ms = kept.last().map_or(0, |b| b.time_ms);
        if sample.time_ms - last_ms < params.min_segment_ms {
            continue;
        }
        kept.push(Boundary {
            time_ms: sample.time_ms,
            score: sample.score,
        });
    }

    // Every earlier boundary is at least `min_segment_ms` before the last one,
    // so dropping the last is enough to lengthen the tail.
    if kept
        .last()
        .is_some_and(|b| end_ms - b.time_ms < params.min_segment_ms)
    {
        kept.pop();
    }

    kept
}

/// Suggested segments covering `[0, end)`.
///
/// `end` is the tape duration when known, otherwise the last sample time.
/// With no usable end the result is empty.
pub fn suggest_segments(
    samples: &[FrameScore],
    duration_ms: Option<i64>,
    params: &DetectorParams,
) -> Vec<SuggestedSegment> {
    let end_ms = match duration_ms
        .filter(|d| *d > 0)
        .or_else(|| samples.iter().map(|s| s.time_ms).max())
    {
        Some(end) if end > 0 => end,
        _ => return Vec::new(),
    };

    let boundaries = detect_boundaries(samples, end_ms, params);

    let mut segments = Vec::with_capacity(boundaries.len() + 1);
    let mut start_ms = 0;
    let mut confidence = None;
    for boundary in boundaries {
        segments.push(SuggestedSegment {
            start_ms,
            end_ms: boundary.time_ms,
            confidence,
        });
        start_ms = boundary.time_ms;
        confidence = Some(boundary.score);
    }
    segments.push(SuggestedSegment {
        start_ms,
        end_ms,
        confidence,
    });
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: DetectorParams = DetectorParams {
        threshold: 0.35,
        min_segment_ms: 90_000,
    };

    fn s(time_ms: i64, score: f64) -> FrameScore {
        FrameScore { time_ms, score }
    }

    fn spans(segments: &[SuggestedSegment]) -> Vec<(i64, i64)> {
        segments.iter().map(|s| (s.start_ms, s.end_ms)).collect()
    }

    #[test]
    fn test_no_candidates_single_segment() {
        let samples = vec![s(0, 0.0), s(1000, 0.2), s(2000, 0.35)];
        let segments = suggest_segments(&samples, Some(600_000), &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 600_000)]);
        assert_eq!(segments[0].confidence, None);
    }

    #[test]
    fn test_score_equal_to_threshold_is_not_candidate() {
        let samples = vec![s(200_000, 0.35)];
        assert!(detect_boundaries(&samples, 600_000, &PARAMS).is_empty());
    }

    #[test]
    fn test_close_candidates_keep_earlier() {
        let samples = vec![s(100_000, 0.5), s(150_000, 0.9)];
        let boundaries = detect_boundaries(&samples, 600_000, &PARAMS);
        assert_eq!(
            boundaries,
            vec![Boundary {
                time_ms: 100_000,
                score: 0.5
            }]
        );
    }

    #[test]
    fn test_distance_measured_from_last_kept() {
        // 150k is dropped (50k after 100k); 200k is 100k after the kept 100k.
        let samples = vec![s(100_000, 0.5), s(150_000, 0.5), s(200_000, 0.5)];
        let boundaries = detect_boundaries(&samples, 600_000, &PARAMS);
        let times: Vec<i64> = boundaries.iter().map(|b| b.time_ms).collect();
        assert_eq!(times, vec![100_000, 200_000]);
    }

    #[test]
    fn test_candidate_at_zero_and_end_discarded() {
        let samples = vec![s(0, 0.99), s(600_000, 0.99)];
        let segments = suggest_segments(&samples, Some(600_000), &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 600_000)]);
    }

    #[test]
    fn test_short_head_and_tail_are_merged() {
        let samples = vec![s(1_000, 0.9), s(599_000, 0.9)];
        let segments = suggest_segments(&samples, Some(600_000), &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 600_000)]);
    }

    #[test]
    fn test_candidate_near_start_dropped() {
        // 50k is too close to 0; 140k is kept as the first boundary.
        let samples = vec![s(50_000, 0.9), s(140_000, 0.5)];
        let boundaries = detect_boundaries(&samples, 600_000, &PARAMS);
        let times: Vec<i64> = boundaries.iter().map(|b| b.time_ms).collect();
        assert_eq!(times, vec![140_000]);
    }

    #[test]
    fn test_boundary_near_end_dropped() {
        let samples = vec![s(200_000, 0.6), s(400_000, 0.6), s(550_000, 0.9)];
        let segments = suggest_segments(&samples, Some(600_000), &PARAMS);
        assert_eq!(
            spans(&segments),
            vec![(0, 200_000), (200_000, 400_000), (400_000, 600_000)]
        );
        assert!(segments
            .iter()
            .all(|seg| seg.end_ms - seg.start_ms >= PARAMS.min_segment_ms));
    }

    #[test]
    fn test_tape_shorter_than_minimum_is_one_segment() {
        let samples = vec![s(20_000, 0.9), s(40_000, 0.9)];
        let segments = suggest_segments(&samples, Some(60_000), &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 60_000)]);
    }

    #[test]
    fn test_segments_are_contiguous() {
        let samples = vec![
            s(0, 0.0),
            s(120_000, 0.6),
            s(125_000, 0.7),
            s(300_000, 0.4),
            s(310_000, 0.1),
        ];
        let segments = suggest_segments(&samples, Some(500_000), &PARAMS);
        assert_eq!(
            spans(&segments),
            vec![(0, 120_000), (120_000, 300_000), (300_000, 500_000)]
        );
        assert_eq!(segments[1].confidence, Some(0.6));
        assert_eq!(segments[2].confidence, Some(0.4));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let samples = vec![s(300_000, 0.4), s(120_000, 0.6)];
        let segments = suggest_segments(&samples, Some(500_000), &PARAMS);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].start_ms, 120_000);
    }

    #[test]
    fn test_empty_input_unknown_duration() {
        assert!(suggest_segments(&[], None, &PARAMS).is_empty());
    }

    #[test]
    fn test_empty_input_known_duration() {
        let segments = suggest_segments(&[], Some(10_000), &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 10_000)]);
    }

    #[test]
    fn test_unknown_duration_uses_last_sample() {
        let samples = vec![s(0, 0.0), s(100_000, 0.8), s(250_000, 0.1)];
        let segments = suggest_segments(&samples, None, &PARAMS);
        assert_eq!(spans(&segments), vec![(0, 100_000), (100_000, 250_000)]);
    }

    #[test]
    fn test_zero_min_segment_keeps_every_candidate() {
        let params = DetectorParams {
            threshold: 0.3,
            min_segment_ms: 0,
        };
        let samples = vec![s(10, 0.5), s(20, 0.5), s(30, 0.5)];
        let segments = suggest_segments(&samples, Some(40), &params);
        assert_eq!(segments.len(), 4);
    }

    #[test]
    fn test_params_from_config() {
        let params = DetectorParams::from(&DetectorConfig::default());
        assert_eq!(params, PARAMS);
    }
}
