//! Transcoding tool error types.

use thiserror::Error;

use super::tool::Program;

/// Failure of a single tool invocation. Every variant is recoverable by the caller.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The binary could not be located.
    #[error("{program} is not available on this system")]
    Unavailable { program: Program },

    /// The process exceeded its time budget and was killed.
    #[error("{program} timed out after {secs}s")]
    Timeout { program: Program, secs: u64 },

    /// The process exited unsuccessfully.
    #[error("{program} failed (exit code {}): {stderr_tail}", display_code(.exit_code))]
    Failed {
        program: Program,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// Cancellation was requested and the process was killed.
    #[error("{program} was canceled")]
    Canceled { program: Program },

    /// The process could not be spawned or its output read.
    #[error("failed to run {program}: {source}")]
    Io {
        program: Program,
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ToolError {
    /// Errors after which continuing a batch is pointless.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, ToolError::Unavailable { .. } | ToolError::Canceled { .. })
    }
}
