//! Subprocess execution with timeout and cancellation.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ToolError;
use super::parse::stderr_tail;
use crate::config::ToolsConfig;
use crate::sanitize::redact_args;

/// Which binary an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Ffmpeg,
    Ffprobe,
}

impl Program {
    pub fn binary_name(self) -> &'static str {
        match self {
            Program::Ffmpeg => "ffmpeg",
            Program::Ffprobe => "ffprobe",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: Program,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn ffmpeg(args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: Program::Ffmpeg,
            args,
            timeout,
        }
    }

    pub fn ffprobe(args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: Program::Ffprobe,
            args,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Runs transcoding tool invocations.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Runs one invocation to completion.
    ///
    /// The child is killed when `invocation.timeout` elapses or `cancel` fires.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>;

    /// Resolves the binary without spawning it.
    fn check_available(&self, program: Program) -> Result<PathBuf, ToolError>;
}

/// [`MediaTool`] backed by the real ffmpeg/ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTool {
    ffmpeg_path: Option<PathBuf>,
    ffprobe_path: Option<PathBuf>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Canceled,
}

impl FfmpegTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.as_ref().map(PathBuf::from),
            ffprobe_path: config.ffprobe_path.as_ref().map(PathBuf::from),
        }
    }

    fn configured(&self, program: Program) -> Option<&PathBuf> {
        match program {
            Program::Ffmpeg => self.ffmpeg_path.as_ref(),
            Program::Ffprobe => self.ffprobe_path.as_ref(),
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let program = invocation.program;
        let binary = self.check_available(program)?;

        if cancel.is_cancelled() {
            return Err(ToolError::Canceled { program });
        }

        debug!(
            event = "tool_start",
            program = %program,
            args = %redact_args(&invocation.args),
            timeout_secs = invocation.timeout.as_secs(),
            "Running {}",
            program
        );

        let mut child = Command::new(&binary)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::Unavailable { program },
                _ => ToolError::Io { program, source: e },
            })?;

        // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Canceled,
        };

        match outcome {
            Outcome::TimedOut => {
                let _ = child.kill().await;
                warn!(
                    event = "tool_timeout",
                    program = %program,
                    timeout_secs = invocation.timeout.as_secs(),
                    "{} timed out, process killed",
                    program
                );
                Err(ToolError::Timeout {
                    program,
                    secs: invocation.timeout.as_secs(),
                })
            }
            Outcome::Canceled => {
                let _ = child.kill().await;
                debug!(event = "tool_canceled", program = %program, "{} canceled", program);
                Err(ToolError::Canceled { program })
            }
            Outcome::Exited(status) => {
                let status = status.map_err(|e| ToolError::Io { program, source: e })?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let output = ToolOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code: status.code(),
                };

                if status.success() {
                    Ok(output)
                } else {
                    let tail = stderr_tail(&output.stderr);
                    warn!(
                        event = "tool_failed",
                        program = %program,
                        exit_code = ?output.exit_code,
                        stderr_tail = %tail,
                        "{} exited unsuccessfully",
                        program
                    );
                    Err(ToolError::Failed {
                        program,
                        exit_code: output.exit_code,
                        stderr_tail: tail,
                    })
                }
            }
        }
    }

    fn check_available(&self, program: Program) -> Result<PathBuf, ToolError> {
        if let Some(path) = self.configured(program) {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(ToolError::Unavailable { program })
            };
        }
        which::which(program.binary_name()).map_err(|_| ToolError::Unavailable { program })
    }
}
