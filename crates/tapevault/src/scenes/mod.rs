//! Scene boundary suggestion from a frame-difference signal.

pub mod detector;

pub use detector::{detect_boundaries, suggest_segments, Boundary, DetectorParams, SuggestedSegment};
