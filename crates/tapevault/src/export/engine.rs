//! Segment export with a stream-copy fast path and a re-encode fallback.
//!
//! Each clip is written to `segment_<id>.mp4.partial` next to its final name
//! and renamed into place only after the tool succeeded and produced a
//! non-empty file, so a crash never leaves a truncated clip behind under the
//! final name. Re-runs skip segments whose recorded output still exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ExportProfile, ProjectPaths};
use crate::db::segment_repo::{self, SegmentRow, STATUS_ACCEPTED, STATUS_EXPORTED};
use crate::db::tape_repo::TapeRow;
use crate::db::{review_repo, Database, DatabaseError};
use crate::error::StorageError;
use crate::jobs::{ProgressReporter, TaskError};
use crate::media::{args, MediaTool, ToolError};
use crate::sanitize::redact_path;
use crate::storage::{ensure_directory, move_file};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Re-export segments whose output already exists.
    pub force: bool,
}

/// One segment that could not be exported by either path.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SegmentFailure {
    pub segment_id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExportReport {
    /// Segments for which a tool run was attempted.
    pub attempted: usize,
    pub exported: usize,
    pub skipped: usize,
    /// Segments that needed the re-encode fallback.
    pub used_fallback: usize,
    pub failed: Vec<SegmentFailure>,
}

impl ExportReport {
    /// True when segments failed and none of the tape's segments ended up
    /// exported, counting those skipped as already exported.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.failed.len() == self.attempted + self.skipped
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} exported, {} skipped, {} failed",
            self.exported,
            self.skipped,
            self.failed.len()
        );
        if self.used_fallback > 0 {
            summary.push_str(&format!(" ({} re-encoded)", self.used_fallback));
        }
        summary
    }
}

#[derive(Error, Debug)]
enum SegmentError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("output file is missing or empty: {0}")]
    EmptyOutput(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("stream copy failed ({fast}); re-encode failed ({fallback})")]
    BothPathsFailed { fast: String, fallback: String },
}

impl SegmentError {
    fn aborts_batch(&self) -> bool {
        match self {
            SegmentError::Tool(e) => e.aborts_batch(),
            SegmentError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<SegmentError> for TaskError {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::Tool(e) => TaskError::Tool(e),
            SegmentError::Storage(e) => TaskError::Storage(e),
            SegmentError::Database(e) => TaskError::Database(e),
            other => TaskError::InvalidInput(other.to_string()),
        }
    }
}

/// Final clip location: `<segments_dir>/<tape_code>/segment_<id>.mp4`.
pub fn segment_output_path(paths: &ProjectPaths, tape_code: &str, segment_id: i64) -> PathBuf {
    paths
        .tape_segments_dir(tape_code)
        .join(format!("segment_{:03}.mp4", segment_id))
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn existing_output(seg: &SegmentRow) -> Option<&str> {
    seg.output_path
        .as_deref()
        .filter(|p| Path::new(p).is_file())
}

pub struct ExportEngine<'a> {
    pub db: &'a Database,
    pub tool: &'a dyn MediaTool,
    pub paths: &'a ProjectPaths,
    pub profile: &'a ExportProfile,
    pub timeout: Duration,
}

impl ExportEngine<'_> {
    /// Exports every accepted (and, when needed, exported) segment of a tape.
    ///
    /// A failing segment is recorded and the batch continues; only an
    /// unavailable tool, cancellation or a database error aborts it.
    pub async fn export(
        &self,
        tape: &TapeRow,
        options: ExportOptions,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<ExportReport, TaskError> {
        let raw_path = tape
            .raw_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| TaskError::InvalidInput(format!("tape {} has no raw file", tape.id)))?;

        let segments =
            segment_repo::list_by_status(self.db, tape.id, &[STATUS_ACCEPTED, STATUS_EXPORTED])?;
        let total = segments.len();
        let mut report = ExportReport::default();

        for (index, seg) in segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            let percent = 5 + (90 * index / total.max(1)) as u8;
            let detail = format!("segment {}/{}", index + 1, total);
            progress.report(percent, "Exporting segments", Some(&detail));

            if !options.force {
                if let Some(path) = existing_output(seg) {
                    if seg.status == STATUS_EXPORTED {
                        info!(
                            event = "segment_export_skipped",
                            tape_id = tape.id,
                            segment_id = seg.id,
                            output = %redact_path(Path::new(path)),
                            "Segment already exported"
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
                let target = segment_output_path(self.paths, &tape.tape_code, seg.id);
                if seg.status == STATUS_ACCEPTED && target.is_file() {
                    segment_repo::mark_exported(self.db, seg.id, &target.to_string_lossy())?;
                    info!(
                        event = "segment_export_skipped",
                        tape_id = tape.id,
                        segment_id = seg.id,
                        output = %redact_path(&target),
                        "Adopted existing clip"
                    );
                    report.skipped += 1;
                    continue;
                }
            }

            report.attempted += 1;
            match self.export_segment(tape, seg, &raw_path, cancel).await {
                Ok(used_fallback) => {
                    report.exported += 1;
                    if used_fallback {
                        report.used_fallback += 1;
                    }
                }
                Err(e) if e.aborts_batch() => return Err(e.into()),
                Err(e) => {
                    error!(
                        event = "segment_export_failed",
                        tape_id = tape.id,
                        segment_id = seg.id,
                        error = %e,
                        "Segment export failed"
                    );
                    report.failed.push(SegmentFailure {
                        segment_id: seg.id,
                        start_ms: seg.start_ms,
                        end_ms: seg.end_ms,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.record_review(tape, &report)?;
        progress.report(95, "Exporting segments", Some(&report.summary()));
        Ok(report)
    }

    fn record_review(&self, tape: &TapeRow, report: &ExportReport) -> Result<(), DatabaseError> {
        if report.failed.is_empty() {
            review_repo::resolve_open(self.db, tape.id, review_repo::NEEDS_EXPORT_REVIEW)?;
            return Ok(());
        }
        let payload = serde_json::json!({ "failures": report.failed });
        review_repo::create(
            self.db,
            tape.id,
            review_repo::NEEDS_EXPORT_REVIEW,
            &format!(
                "{} of {} segment exports failed",
                report.failed.len(),
                report.attempted
            ),
            Some(&payload),
        )?;
        Ok(())
    }

    /// Exports one segment. Returns whether the fallback was needed.
    async fn export_segment(
        &self,
        tape: &TapeRow,
        seg: &SegmentRow,
        raw_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, SegmentError> {
        let target = segment_output_path(self.paths, &tape.tape_code, seg.id);
        if let Some(dir) = target.parent() {
            ensure_directory(dir)?;
        }
        let partial = partial_path(&target);

        let fast = args::stream_copy(raw_path, &partial, seg.start_ms, seg.end_ms, self.timeout);
        let used_fallback = match self.attempt(&fast, &partial, cancel).await {
            Ok(()) => false,
            Err(e) if e.aborts_batch() => return Err(e),
            Err(fast_err) => {
                warn!(
                    event = "segment_fast_path_failed",
                    tape_id = tape.id,
                    segment_id = seg.id,
                    error = %fast_err,
                    "Stream copy failed, re-encoding"
                );
                let slow = args::reencode(
                    raw_path,
                    &partial,
                    seg.start_ms,
                    seg.end_ms,
                    self.profile,
                    self.timeout,
                );
                match self.attempt(&slow, &partial, cancel).await {
                    Ok(()) => {
                        info!(
                            event = "segment_fallback_succeeded",
                            tape_id = tape.id,
                            segment_id = seg.id,
                            "Re-encode succeeded"
                        );
                        true
                    }
                    Err(e) if e.aborts_batch() => return Err(e),
                    Err(e) => {
                        return Err(SegmentError::BothPathsFailed {
                            fast: fast_err.to_string(),
                            fallback: e.to_string(),
                        })
                    }
                }
            }
        };

        move_file(&partial, &target)?;
        let output = target.to_string_lossy();
        segment_repo::mark_exported(self.db, seg.id, &output)?;
        info!(
            event = "segment_exported",
            tape_id = tape.id,
            segment_id = seg.id,
            output = %redact_path(&target),
            fallback = used_fallback,
            "Segment exported"
        );
        Ok(used_fallback)
    }

    /// Runs one tool invocation into `partial` and checks the result.
    async fn attempt(
        &self,
        invocation: &crate::media::ToolInvocation,
        partial: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SegmentError> {
        let _ = std::fs::remove_file(partial);
        let result = match self.tool.run(invocation, cancel).await {
            Ok(_) => match std::fs::metadata(partial) {
                Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
                _ => Err(SegmentError::EmptyOutput(partial.to_path_buf())),
            },
            Err(e) => Err(SegmentError::Tool(e)),
        };
        if result.is_err() {
            let _ = std::fs::remove_file(partial);
        }
        result
    }
}
