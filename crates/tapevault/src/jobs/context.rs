use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::TaskError;
use super::progress::JobProgress;
use crate::config::{Config, ProjectPaths};
use crate::db::Database;
use crate::media::MediaTool;

/// Everything a task body may touch.
#[derive(Clone)]
pub struct TaskContext {
    pub job_id: String,
    pub target_id: String,
    pub payload: Value,
    pub db: Database,
    pub config: Arc<Config>,
    pub paths: Arc<ProjectPaths>,
    pub tool: Arc<dyn MediaTool>,
    pub cancel: CancellationToken,
    pub progress: Arc<JobProgress>,
}

impl TaskContext {
    /// Returns `Err(Canceled)` once cancellation has been requested.
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        Ok(())
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }
}

/// Successful task result.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Stored as `result_json`; carries `redirect_url` for the client.
    pub result: Value,
    /// Final human-readable summary.
    pub detail: Option<String>,
}

impl TaskOutcome {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
