//! Background job execution.
//!
//! [`JobRunner`] persists every job in the `jobs` table, runs its task body
//! on the tokio runtime and exposes a cheap [`JobRunner::status`] snapshot
//! for polling clients. At most one job is queued or running per target.

pub mod context;
pub mod error;
pub mod model;
pub mod progress;
pub mod runner;
pub mod tasks;

pub use context::{TaskContext, TaskOutcome};
pub use error::{JobError, TaskError};
pub use model::{tape_target, JobListFilter, JobStatus, JobType, JobView, INBOX_TARGET};
pub use progress::{
    JobProgress, JobProgressBroadcaster, JobProgressEvent, NoopProgress, ProgressReporter,
    ProgressSnapshot,
};
pub use runner::JobRunner;
