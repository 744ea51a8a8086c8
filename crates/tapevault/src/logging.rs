//! Process-wide tracing setup.
//!
//! Events go to stdout (pretty or JSON) and, as JSON lines, to
//! `<logs_dir>/app.log`. `log` records from the store layer are bridged into
//! tracing. The level defaults to `info` and follows `RUST_LOG` when set.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::StorageError;
use crate::storage::ensure_directory;

pub const LOG_FILE_NAME: &str = "app.log";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to open log file '{path}': {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global logger is already installed: {0}")]
    AlreadyInitialized(String),
}

fn open_log_file(logs_dir: &Path) -> Result<File, LoggingError> {
    ensure_directory(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| LoggingError::OpenFile { path, source: e })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(logs_dir: &Path, json: bool) -> Result<(), LoggingError> {
    let file = open_log_file(logs_dir)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_json = json.then(|| fmt::layer().json().with_target(true));
    let stdout_pretty = (!json).then(|| fmt::layer().with_target(true).with_thread_ids(false));
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let subscriber = Registry::default()
        .with(filter)
        .with(stdout_json)
        .with(stdout_pretty)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        event = "logging_initialized",
        log_file = %logs_dir.join(LOG_FILE_NAME).display(),
        "Logging initialized"
    );
    Ok(())
}
