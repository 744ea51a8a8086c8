use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::StorageError;
use crate::media::ToolError;

/// Errors returned by [`super::JobRunner`] operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// Another job is already queued or running for this target.
    #[error("target '{target_id}' already has active job {active_job_id}")]
    Conflict {
        target_id: String,
        active_job_id: String,
    },

    #[error("job not found: {0}")]
    NotFound(String),

    /// Only failed, stale or canceled jobs can be retried.
    #[error("job {job_id} cannot be retried from status '{status}'")]
    NotRetryable { job_id: String, status: String },

    #[error("job record is invalid: {0}")]
    InvalidRecord(String),

    #[error("no tokio runtime available to run jobs: {0}")]
    Runtime(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Failure of a task body. The runner records it as the job's `error_text`.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job was canceled")]
    Canceled,

    #[error("all {failed} segment exports failed")]
    AllSegmentsFailed { failed: usize },

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Whether the job should end as `canceled` rather than `failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TaskError::Canceled | TaskError::Tool(ToolError::Canceled { .. })
        )
    }
}
