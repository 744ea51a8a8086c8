//! Clip export for accepted segments.

pub mod engine;

pub use engine::{segment_output_path, ExportEngine, ExportOptions, ExportReport, SegmentFailure};
