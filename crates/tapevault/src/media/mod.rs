//! Adapter over the external ffmpeg/ffprobe binaries.
//!
//! [`MediaTool`] is the seam: production code runs [`FfmpegTool`], tests
//! substitute a scripted implementation. Argument construction lives in
//! [`args`], output parsing in [`parse`], and the composed probe, thumbnail
//! and frame-score operations in [`ops`].

pub mod args;
pub mod error;
pub mod ops;
pub mod parse;
pub mod tool;

pub use error::ToolError;
pub use parse::FrameScore;
pub use tool::{FfmpegTool, MediaTool, Program, ToolInvocation, ToolOutput};
