//! Inbox ingest: copies capture files into raw storage and records tapes.
//!
//! Files are deduplicated by SHA-256 content hash. The inbox copy is never
//! removed; a file whose hash is already known is reported as a duplicate.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProjectPaths;
use crate::db::review_repo;
use crate::db::tape_repo::{self, NewTape, RawFile, TapeRow, BACKUP_DONE, BACKUP_NEEDED};
use crate::db::Database;
use crate::error::StorageError;
use crate::jobs::{ProgressReporter, TaskError};
use crate::sanitize::redact_path;
use crate::storage::{copy_unique, sha256_file};

/// Whether a path has an `.mp4` extension (any case).
pub fn is_mp4(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    New,
    Ingested,
    Error,
}

/// One capture file waiting in the inbox.
#[derive(Debug, Clone, Serialize)]
pub struct InboxFile {
    pub name: String,
    pub size_bytes: u64,
    pub status: InboxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested {
        filename: String,
        tape_id: i64,
        tape_code: String,
        raw_path: String,
        backup_status: String,
    },
    /// The content hash matches an existing tape.
    Duplicate { filename: String, tape_id: i64 },
}

/// Inbox `.mp4` files by name, with their ingest state.
///
/// Directory reads and hashing run on the blocking pool. Cancellation is
/// checked before each file is hashed.
pub async fn list_inbox(
    db: &Database,
    paths: &ProjectPaths,
    cancel: &CancellationToken,
) -> Result<Vec<InboxFile>, TaskError> {
    let inbox_dir = paths.inbox_dir.clone();
    let files = blocking(move || scan_inbox(&inbox_dir)).await?;

    let mut listed = Vec::with_capacity(files.len());
    for (path, name, size_bytes) in files {
        if cancel.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        let hashed = tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(|e| TaskError::Panicked(e.to_string()))?;
        let file = match hashed {
            Ok(hash) => {
                let status = if tape_repo::find_by_sha256(db, &hash)?.is_some() {
                    InboxStatus::Ingested
                } else {
                    InboxStatus::New
                };
                InboxFile {
                    name,
                    size_bytes,
                    status,
                    sha256: Some(hash),
                    error: None,
                }
            }
            Err(e) => InboxFile {
                name,
                size_bytes,
                status: InboxStatus::Error,
                sha256: None,
                error: Some(e.to_string()),
            },
        };
        listed.push(file);
    }
    Ok(listed)
}

/// Sorted `(path, name, size)` of the `.mp4` files in the inbox.
fn scan_inbox(inbox_dir: &Path) -> Result<Vec<(PathBuf, String, u64)>, StorageError> {
    let entries = std::fs::read_dir(inbox_dir).map_err(|e| StorageError::ReadFile {
        path: inbox_dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<(PathBuf, String, u64)> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_mp4(p))
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_string();
            let size = std::fs::metadata(&p).map(|m| m.len()).unwrap_or(0);
            Some((p, name, size))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

async fn blocking<T, F>(f: F) -> Result<T, TaskError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskError::Panicked(e.to_string()))?
        .map_err(TaskError::from)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Ingests one inbox file, optionally attaching it to an existing tape.
pub async fn ingest_file(
    db: &Database,
    paths: &ProjectPaths,
    filename: &str,
    tape_id: Option<i64>,
    progress: &dyn ProgressReporter,
) -> Result<IngestOutcome, TaskError> {
    ingest(db, paths, filename, tape_id, None, progress).await
}

/// Ingests a file returned by [`list_inbox`], reusing the hash computed
/// while listing.
pub async fn ingest_listed(
    db: &Database,
    paths: &ProjectPaths,
    file: &InboxFile,
    progress: &dyn ProgressReporter,
) -> Result<IngestOutcome, TaskError> {
    ingest(db, paths, &file.name, None, file.sha256.clone(), progress).await
}

async fn ingest(
    db: &Database,
    paths: &ProjectPaths,
    filename: &str,
    tape_id: Option<i64>,
    known_hash: Option<String>,
    progress: &dyn ProgressReporter,
) -> Result<IngestOutcome, TaskError> {
    progress.report(5, "Validate inputs", Some(&format!("Checking {}", filename)));
    let source = paths
        .inbox_file(filename)
        .ok_or_else(|| TaskError::InvalidInput(format!("invalid inbox file name: {}", filename)))?;
    if !source.is_file() {
        return Err(TaskError::InvalidInput(format!("file not found: {}", filename)));
    }
    if !is_mp4(&source) {
        return Err(TaskError::InvalidInput(format!("unsupported file type: {}", filename)));
    }
    if let Some(id) = tape_id {
        if tape_repo::find_by_id(db, id)?.is_none() {
            return Err(TaskError::InvalidInput(format!("tape {} not found", id)));
        }
    }

    info!(event = "ingest_started", file = %filename, "Ingest started");

    let source_hash = match known_hash {
        Some(hash) => hash,
        None => {
            let hash_source = source.clone();
            blocking(move || sha256_file(&hash_source)).await?
        }
    };
    if let Some(existing) = tape_repo::find_by_sha256(db, &source_hash)? {
        info!(
            event = "ingest_skipped",
            file = %filename,
            tape_id = existing.id,
            "Already ingested"
        );
        return Ok(IngestOutcome::Duplicate {
            filename: filename.to_string(),
            tape_id: existing.id,
        });
    }

    progress.report(15, "Copy files", Some(&format!("Copying {}", filename)));
    let (copy_source, raw_dir) = (source.clone(), paths.raw_dir.clone());
    let raw_path = blocking(move || copy_unique(&copy_source, &raw_dir)).await?;

    progress.report(40, "Compute checksums", Some(&format!("Hashing {}", filename)));
    let hash_raw = raw_path.clone();
    let raw_hash = blocking(move || sha256_file(&hash_raw)).await?;
    if raw_hash != source_hash {
        warn!(
            event = "ingest_hash_mismatch",
            file = %filename,
            raw = %redact_path(&raw_path),
            "Raw copy checksum differs from inbox file"
        );
    }
    let size_bytes = std::fs::metadata(&raw_path)
        .map(|m| m.len() as i64)
        .map_err(|e| StorageError::ReadFile {
            path: raw_path.clone(),
            source: e,
        })?;

    progress.report(70, "Write DB rows", Some("Saving ingest metadata"));
    let raw_path_str = raw_path.to_string_lossy().into_owned();
    let raw_filename = raw_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let tape = match tape_id {
        Some(id) => {
            tape_repo::attach_raw_file(
                db,
                id,
                &RawFile {
                    raw_path: &raw_path_str,
                    raw_filename: &raw_filename,
                    sha256: &raw_hash,
                    file_size_bytes: size_bytes,
                },
            )?;
            tape_repo::find_by_id(db, id)?
                .ok_or_else(|| TaskError::InvalidInput(format!("tape {} not found", id)))?
        }
        None => {
            let tape = tape_repo::insert(
                db,
                &NewTape {
                    title: file_stem(&source),
                    raw_path: Some(raw_path_str.clone()),
                    raw_filename: Some(raw_filename.clone()),
                    sha256: Some(raw_hash.clone()),
                    file_size_bytes: Some(size_bytes),
                },
            )?;
            review_repo::create(
                db,
                tape.id,
                review_repo::NEEDS_METADATA,
                &format!("Tape {} was created from {}; add its metadata", tape.tape_code, filename),
                None,
            )?;
            info!(
                event = "tape_created",
                tape_id = tape.id,
                tape_code = %tape.tape_code,
                "Created tape from inbox file"
            );
            tape
        }
    };

    progress.report(85, "Backup attempt", Some("Copying to backup"));
    let backup_status = back_up(db, paths, &tape, &raw_path).await?;

    info!(
        event = "ingest_complete",
        file = %filename,
        tape_id = tape.id,
        backup_status = %backup_status,
        "Ingest complete"
    );
    progress.report(100, "Done", Some("Ingest completed"));

    Ok(IngestOutcome::Ingested {
        filename: filename.to_string(),
        tape_id: tape.id,
        tape_code: tape.tape_code,
        raw_path: raw_path_str,
        backup_status: backup_status.to_string(),
    })
}

/// Copies the raw file into the backup directory and records the result.
async fn back_up(
    db: &Database,
    paths: &ProjectPaths,
    tape: &TapeRow,
    raw_path: &Path,
) -> Result<&'static str, TaskError> {
    let outcome = match &paths.backup_dir {
        Some(dir) => {
            let (src, dir) = (raw_path.to_path_buf(), dir.clone());
            blocking(move || copy_unique(&src, &dir))
                .await
                .map_err(|e| e.to_string())
        }
        None => Err("no backup directory configured".to_string()),
    };

    match outcome {
        Ok(copy) => {
            tape_repo::set_backup_status(db, tape.id, BACKUP_DONE)?;
            review_repo::resolve_open(db, tape.id, review_repo::NEEDS_BACKUP)?;
            info!(
                event = "backup_complete",
                tape_id = tape.id,
                backup = %redact_path(&copy),
                "Backup completed"
            );
            Ok(BACKUP_DONE)
        }
        Err(reason) => {
            tape_repo::set_backup_status(db, tape.id, BACKUP_NEEDED)?;
            let payload = serde_json::json!({
                "raw_path": raw_path.to_string_lossy(),
                "attempted_path": paths.backup_dir.as_ref().map(|d| d.to_string_lossy().into_owned()),
                "error": reason,
            });
            review_repo::create(
                db,
                tape.id,
                review_repo::NEEDS_BACKUP,
                &format!("Backup of {} failed: {}", tape.tape_code, reason),
                Some(&payload),
            )?;
            warn!(
                event = "backup_failed",
                tape_id = tape.id,
                error = %reason,
                "Backup failed"
            );
            Ok(BACKUP_NEEDED)
        }
    }
}

/// Retries the backup copy of a tape's raw file.
pub async fn retry_backup(
    db: &Database,
    paths: &ProjectPaths,
    tape_id: i64,
) -> Result<&'static str, TaskError> {
    let tape = tape_repo::find_by_id(db, tape_id)?
        .ok_or_else(|| TaskError::InvalidInput(format!("tape {} not found", tape_id)))?;
    let raw_path = tape
        .raw_path
        .as_deref()
        .map(PathBuf::from)
        .filter(|p| p.is_file())
        .ok_or_else(|| TaskError::InvalidInput(format!("raw file not found for tape {}", tape_id)))?;
    back_up(db, paths, &tape, &raw_path).await
}
