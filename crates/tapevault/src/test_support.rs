//! Helpers shared by unit tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ProjectPaths};
use crate::db::tape_repo::{self, NewTape, TapeRow};
use crate::db::Database;
use crate::media::{MediaTool, Program, ToolError, ToolInvocation, ToolOutput};

/// Temp project directory with an in-memory database.
pub struct TestProject {
    _dir: TempDir,
    pub db: Database,
    pub config: Config,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            project_root: Some(dir.path().to_string_lossy().into_owned()),
            ..Config::default()
        };
        let paths = ProjectPaths::from_config(&config).unwrap();
        paths.ensure_dirs().unwrap();
        Self {
            _dir: dir,
            db: Database::open_in_memory().unwrap(),
            config,
            paths,
        }
    }

    /// Tape with a small raw file on disk.
    pub fn tape_with_raw(&self, duration_seconds: Option<f64>) -> TapeRow {
        let raw = self.paths.raw_dir.join(format!(
            "capture_{}.mp4",
            tape_repo::list(&self.db).unwrap().len()
        ));
        std::fs::write(&raw, b"raw video").unwrap();
        let tape = tape_repo::insert(
            &self.db,
            &NewTape {
                raw_path: Some(raw.to_string_lossy().into_owned()),
                raw_filename: raw.file_name().map(|n| n.to_string_lossy().into_owned()),
                ..NewTape::default()
            },
        )
        .unwrap();
        if duration_seconds.is_some() {
            tape_repo::update_media_info(&self.db, tape.id, duration_seconds, None).unwrap();
        }
        tape_repo::find_by_id(&self.db, tape.id).unwrap().unwrap()
    }
}

type Predicate = Box<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;

/// Scripted [`MediaTool`]. Successful ffmpeg runs touch their output file.
#[derive(Default)]
pub struct FakeTool {
    unavailable: HashSet<Program>,
    failures: Vec<Predicate>,
    stdout: Vec<(Predicate, String)>,
    calls: AtomicUsize,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self, program: Program) -> Self {
        self.unavailable.insert(program);
        self
    }

    pub fn fail_when(
        mut self,
        predicate: impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failures.push(Box::new(predicate));
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

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

/// Whether any argument equals `flag`.
pub fn has_arg(invocation: &ToolInvocation, flag: &str) -> bool {
    invocation.args.iter().any(|a| a == flag)
}

fn output_path(invocation: &ToolInvocation) -> Option<PathBuf> {
    match (invocation.program, invocation.args.last()) {
        (Program::Ffmpeg, Some(last)) if last != "-" => Some(PathBuf::from(last)),
        _ => None,
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let program = invocation.program;
        self.check_available(program)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());

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
        if let Some(path) = output_path(invocation) {
            if let Some(parent) = Path::new(&path).parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, b"clip").unwrap();
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
        Ok(PathBuf::from(format!("/fake/{}", program)))
    }
}
