pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod sanitize;
pub mod scenes;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{load_config, Config, ProjectPaths};
pub use db::Database;
pub use error::{ConfigError, Result, StorageError, TapevaultError};
pub use jobs::{JobError, JobRunner, JobStatus, JobType, JobView, TaskError};
pub use media::{FfmpegTool, MediaTool, ToolError};
