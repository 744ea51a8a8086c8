//! Scripted stand-in for ffmpeg/ffprobe.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tapevault::media::{MediaTool, Program, ToolError, ToolInvocation, ToolOutput};

type Predicate = Box<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;

/// Whether any argument equals `value`.
pub fn has_arg(invocation: &ToolInvocation, value: &str) -> bool {
    invocation.args.iter().any(|a| a == value)
}

/// Successful ffmpeg runs write a small file at their output path (the last
/// argument unless it is `-`).
#[derive(Default)]
pub struct ScriptedTool {
    unavailable: HashSet<Program>,
    failures: Vec<Predicate>,
    hangs: Vec<Predicate>,
    stdout: Vec<(Predicate, String)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    invocations: Mutex<Vec<ToolInvocation>>,
    hanging: Notify,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self, program: Program) -> Self {
        self.unavailable.insert(program);
        self
    }

    /// Exit with status 1 when `predicate` matches.
    pub fn fail_when(
        mut self,
        predicate: impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failures.push(Box::new(predicate));
        self
    }

    /// Block until canceled when `predicate` matches.
    pub fn hang_when(
        mut self,
        predicate: impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hangs.push(Box::new(predicate));
        self
    }

    pub fn stdout_when(
        mut self,
        predicate: impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
        stdout: &str,
    ) -> Self {
        self.stdout.push((Box::new(predicate), stdout.to_string()));
        self
    }

    /// Sleep before every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Resolves once a run is blocked in a hang.
    pub async fn wait_until_hanging(&self) {
        self.hanging.notified().await;
    }
}

#[async_trait]
impl MediaTool for ScriptedTool {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let program = invocation.program;
        self.check_available(program)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hangs.iter().any(|p| p(invocation)) {
            self.hanging.notify_one();
            cancel.cancelled().await;
            return Err(ToolError::Canceled { program });
        }
        if cancel.is_cancelled() {
            return Err(ToolError::Canceled { program });
        }
        if self.failures.iter().any(|p| p(invocation)) {
            return Err(ToolError::Failed {
                program,
                exit_code: Some(1),
                stderr_tail: "scripted failure".to_string(),
            });
        }

        if program == Program::Ffmpeg {
            if let Some(output) = invocation.args.last().filter(|a| a.as_str() != "-") {
                let output = PathBuf::from(output);
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&output, b"clip").unwrap();
            }
        }

        let stdout = self
            .stdout
            .iter()
            .find(|(p, _)| p(invocation))
            .map(|(_, s)| s.clone())
            .unwrap_or_default();
        Ok(ToolOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
        })
    }

    fn check_available(&self, program: Program) -> Result<PathBuf, ToolError> {
        if self.unavailable.contains(&program) {
            return Err(ToolError::Unavailable { program });
        }
        Ok(PathBuf::from(format!("/scripted/{}", program)))
    }
}
