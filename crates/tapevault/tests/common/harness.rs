//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides a complete project layout in a temp
//! directory: inbox, raw storage, segments, and a file-backed SQLite database
//! that can be reopened to simulate a process restart.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tapevault::config::{Config, ProjectPaths};
use tapevault::db::segment_repo::{self, NewSegment, STATUS_ACCEPTED};
use tapevault::db::tape_repo::{self, NewTape, TapeRow};
use tapevault::db::Database;
use tapevault::jobs::{JobRunner, JobView};
use tapevault::media::MediaTool;

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
    pub paths: ProjectPaths,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config {
            project_root: Some(temp_dir.path().to_string_lossy().into_owned()),
            ..Config::default()
        };
        config.jobs.progress_flush_ms = 0;

        let paths = ProjectPaths::from_config(&config).expect("project root is set");
        paths.ensure_dirs().expect("Failed to create project directories");
        let db = Database::open(&paths.db_path).expect("Failed to open database");

        Self {
            temp_dir,
            config,
            paths,
            db,
        }
    }

    /// A second handle on the same database file, as a restarted process would open it.
    pub fn reopen_db(&self) -> Database {
        Database::open(&self.paths.db_path).expect("Failed to reopen database")
    }

    pub fn start_runner(&self, tool: Arc<dyn MediaTool>) -> JobRunner {
        self.start_runner_on(self.db.clone(), tool)
    }

    pub fn start_runner_on(&self, db: Database, tool: Arc<dyn MediaTool>) -> JobRunner {
        JobRunner::start(db, self.config.clone(), self.paths.clone(), tool)
            .expect("Failed to start job runner")
    }

    /// Tape with a raw capture file in raw storage.
    pub fn tape_with_raw(&self, name: &str, duration_seconds: Option<f64>) -> TapeRow {
        let raw = self.paths.raw_dir.join(name);
        std::fs::write(&raw, format!("raw video {}", name)).unwrap();
        let tape = tape_repo::insert(
            &self.db,
            &NewTape {
                title: Some(name.to_string()),
                raw_path: Some(raw.to_string_lossy().into_owned()),
                raw_filename: Some(name.to_string()),
                ..NewTape::default()
            },
        )
        .unwrap();
        if duration_seconds.is_some() {
            tape_repo::update_media_info(&self.db, tape.id, duration_seconds, None).unwrap();
        }
        tape_repo::find_by_id(&self.db, tape.id).unwrap().unwrap()
    }

    pub fn accept_segment(&self, tape_id: i64, start_ms: i64, end_ms: i64) -> i64 {
        segment_repo::insert(
            &self.db,
            tape_id,
            &NewSegment {
                start_ms,
                end_ms,
                confidence: None,
            },
            STATUS_ACCEPTED,
        )
        .unwrap()
    }

    pub fn drop_in_inbox(&self, name: &str, content: &[u8]) {
        std::fs::write(self.paths.inbox_dir.join(name), content).unwrap();
    }
}

/// Waits for a terminal state, failing the test after ten seconds.
pub async fn wait_terminal(runner: &JobRunner, job_id: &str) -> JobView {
    tokio::time::timeout(Duration::from_secs(10), runner.wait(job_id))
        .await
        .expect("job did not finish in time")
        .expect("job vanished")
}
