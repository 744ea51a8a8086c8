//! Shared test utilities for tapevault integration tests.
//!
//! This module provides:
//! - `TestHarness` for an isolated project directory with a file database
//! - `ScriptedTool`, a `MediaTool` whose behaviour is set per invocation

pub mod harness;
pub mod scripted_tool;

pub use harness::TestHarness;
pub use scripted_tool::{has_arg, ScriptedTool};
