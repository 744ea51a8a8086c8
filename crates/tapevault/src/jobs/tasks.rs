//! Task bodies for each job type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use super::context::{TaskContext, TaskOutcome};
use super::error::TaskError;
use super::model::{parse_tape_target, JobType};
use super::progress::{report_while, ProgressReporter};
use crate::db::segment_repo::{self, NewSegment};
use crate::db::tape_repo::{self, TapeRow};
use crate::db::review_repo;
use crate::error::StorageError;
use crate::export::{ExportEngine, ExportOptions};
use crate::ingest::{self, IngestOutcome, InboxStatus};
use crate::media::{ops, Program};
use crate::sanitize::redact_path;
use crate::scenes::{detect_boundaries, suggest_segments, DetectorParams};
use crate::storage::ensure_directory;

/// Client route for a tape page.
pub fn tape_redirect(tape_id: i64) -> String {
    format!("/tapes/{}", tape_id)
}

pub const INGEST_REDIRECT: &str = "/ingest";

/// How often a running frame-difference pass reports elapsed time.
const SCAN_REPORT_EVERY: Duration = Duration::from_secs(2);

pub async fn run(job_type: JobType, ctx: TaskContext) -> Result<TaskOutcome, TaskError> {
    match job_type {
        JobType::IngestAll => ingest_all(&ctx).await,
        JobType::IngestOne => ingest_one(&ctx).await,
        JobType::AnalyzeTape => analyze_tape(&ctx).await,
        JobType::ExportSegments => export_segments(&ctx).await,
    }
}

/// Loads the tape named by a `tape:<id>` target; it must have a raw file.
fn load_tape(ctx: &TaskContext) -> Result<(TapeRow, PathBuf), TaskError> {
    let tape_id = parse_tape_target(&ctx.target_id)
        .ok_or_else(|| TaskError::InvalidInput(format!("not a tape target: {}", ctx.target_id)))?;
    let tape = tape_repo::find_by_id(&ctx.db, tape_id)?
        .ok_or_else(|| TaskError::InvalidInput(format!("tape {} not found", tape_id)))?;
    let raw_path = tape
        .raw_path
        .as_deref()
        .map(PathBuf::from)
        .filter(|p| p.is_file())
        .ok_or_else(|| {
            TaskError::InvalidInput(format!("tape {} has no raw file on disk", tape_id))
        })?;
    Ok((tape, raw_path))
}

async fn ingest_one(ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
    let filename = ctx
        .payload_str("filename")
        .ok_or_else(|| TaskError::InvalidInput("payload is missing 'filename'".to_string()))?
        .to_string();
    let tape_id = ctx.payload_i64("tape_id");

    let outcome = ingest::ingest_file(
        &ctx.db,
        &ctx.paths,
        &filename,
        tape_id,
        ctx.progress.as_ref(),
    )
    .await?;

    let detail = match &outcome {
        IngestOutcome::Ingested { tape_code, .. } => format!("Ingested {} as {}", filename, tape_code),
        IngestOutcome::Duplicate { tape_id, .. } => {
            format!("{} was already ingested (tape {})", filename, tape_id)
        }
    };
    let mut result = serde_json::to_value(&outcome).map_err(crate::db::DatabaseError::from)?;
    result["redirect_url"] = json!(INGEST_REDIRECT);
    Ok(TaskOutcome::new(result).with_detail(detail))
}

async fn ingest_all(ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
    ctx.progress.report(2, "Scanning inbox", None);
    let pending: Vec<_> = ingest::list_inbox(&ctx.db, &ctx.paths, &ctx.cancel)
        .await?
        .into_iter()
        .filter(|f| f.status == InboxStatus::New)
        .collect();

    let total = pending.len();
    let (mut ingested, mut skipped) = (0usize, 0usize);
    let mut failed = Vec::new();

    for (index, file) in pending.iter().enumerate() {
        ctx.check_canceled()?;
        let filename = &file.name;
        let percent = 5 + (90 * index / total.max(1)) as u8;
        ctx.progress.report(
            percent,
            "Ingesting",
            Some(&format!("{} ({}/{})", filename, index + 1, total)),
        );

        match ingest::ingest_listed(&ctx.db, &ctx.paths, file, &super::NoopProgress).await {
            Ok(IngestOutcome::Ingested { .. }) => ingested += 1,
            Ok(IngestOutcome::Duplicate { .. }) => skipped += 1,
            Err(TaskError::Database(e)) => return Err(TaskError::Database(e)),
            Err(e) => {
                warn!(
                    event = "ingest_failed",
                    file = %filename,
                    error = %e,
                    "Ingest of inbox file failed"
                );
                failed.push(json!({ "filename": filename, "error": e.to_string() }));
            }
        }
    }

    let detail = format!(
        "{} ingested, {} skipped, {} failed",
        ingested,
        skipped,
        failed.len()
    );
    Ok(TaskOutcome::new(json!({
        "redirect_url": INGEST_REDIRECT,
        "ingested": ingested,
        "skipped": skipped,
        "failed": failed,
    }))
    .with_detail(detail))
}

fn write_boundaries(path: &Path, value: &serde_json::Value) -> Result<(), TaskError> {
    if let Some(dir) = path.parent() {
        ensure_directory(dir)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(crate::db::DatabaseError::from)?;
    std::fs::write(path, bytes).map_err(|e| {
        TaskError::Storage(StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    })
}

async fn analyze_tape(ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
    let (tape, raw_path) = load_tape(ctx)?;
    let tool = ctx.tool.as_ref();
    tool.check_available(Program::Ffmpeg)?;
    let tools = &ctx.config.tools;

    ctx.progress.report(5, "Probe media", Some("Reading duration"));
    let duration = ops::probe_duration(tool, &raw_path, tools, &ctx.cancel).await?;
    let file_size = std::fs::metadata(&raw_path).ok().map(|m| m.len() as i64);
    tape_repo::update_media_info(&ctx.db, tape.id, duration, file_size)?;
    let duration = duration.or(tape.duration_seconds);
    ctx.check_canceled()?;

    ctx.progress.report(20, "Thumbnail", None);
    if tape.thumb_path.as_deref().map_or(true, |p| !Path::new(p).is_file()) {
        let thumb = ctx.paths.thumbnail_path(&tape.tape_code);
        if let Some(dir) = thumb.parent() {
            ensure_directory(dir)?;
        }
        match ops::extract_thumbnail(tool, &raw_path, &thumb, duration, true, tools, &ctx.cancel).await {
            Ok(()) => tape_repo::set_thumb_path(&ctx.db, tape.id, &thumb.to_string_lossy())?,
            Err(e) if e.aborts_batch() => return Err(e.into()),
            Err(e) => warn!(
                event = "thumbnail_failed",
                tape_id = tape.id,
                error = %e,
                "Thumbnail extraction failed"
            ),
        }
    }
    ctx.check_canceled()?;

    ctx.progress.report(35, "Scene analysis", Some("Computing frame differences"));
    let samples = report_while(
        ops::frame_scores(tool, &raw_path, &ctx.config.detector, tools, &ctx.cancel),
        ctx.progress.as_ref(),
        "Scene analysis",
        "Computing frame differences",
        (35, 80),
        SCAN_REPORT_EVERY,
        tools.analysis_timeout(),
    )
    .await?;
    ctx.check_canceled()?;

    ctx.progress.report(80, "Suggest segments", Some(&format!("{} samples", samples.len())));
    let params = DetectorParams::from(&ctx.config.detector);
    let duration_ms = duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| (d * 1000.0).round() as i64);
    let suggestions = suggest_segments(&samples, duration_ms, &params);
    let end_ms = suggestions.last().map(|s| s.end_ms).unwrap_or(0);
    let boundaries = detect_boundaries(&samples, end_ms, &params);

    let analysis_path = ctx
        .paths
        .tape_analysis_dir(&tape.tape_code)
        .join("boundaries.json");
    write_boundaries(
        &analysis_path,
        &json!({
            "tape_id": tape.id,
            "tape_code": tape.tape_code,
            "duration_ms": duration_ms,
            "threshold": params.threshold,
            "min_segment_ms": params.min_segment_ms,
            "sample_count": samples.len(),
            "boundaries": boundaries,
            "segments": suggestions,
            "generated_at": crate::db::timestamp(),
        }),
    )?;

    let rows: Vec<NewSegment> = suggestions
        .iter()
        .map(|s| NewSegment {
            start_ms: s.start_ms,
            end_ms: s.end_ms,
            confidence: s.confidence,
        })
        .collect();
    segment_repo::replace_suggestions(&ctx.db, tape.id, &rows)?;

    if suggestions.len() > 1 {
        review_repo::create(
            &ctx.db,
            tape.id,
            review_repo::NEEDS_SPLIT_REVIEW,
            &format!("{} segment suggestions ready for review", suggestions.len()),
            Some(&json!({ "suggestions": suggestions.len() })),
        )?;
    }

    info!(
        event = "analysis_complete",
        tape_id = tape.id,
        boundaries = boundaries.len(),
        suggestions = suggestions.len(),
        analysis = %redact_path(&analysis_path),
        "Scene analysis complete"
    );

    Ok(TaskOutcome::new(json!({
        "redirect_url": tape_redirect(tape.id),
        "duration_seconds": duration,
        "boundaries": boundaries.len(),
        "suggestions": suggestions.len(),
    }))
    .with_detail(format!("{} segments suggested", suggestions.len())))
}

async fn export_segments(ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
    let (tape, _) = load_tape(ctx)?;
    ctx.tool.check_available(Program::Ffmpeg)?;

    let engine = ExportEngine {
        db: &ctx.db,
        tool: ctx.tool.as_ref(),
        paths: &ctx.paths,
        profile: &ctx.config.export,
        timeout: ctx.config.tools.export_timeout(),
    };
    let options = ExportOptions {
        force: ctx.payload_bool("force"),
    };
    let report = engine
        .export(&tape, options, &ctx.cancel, ctx.progress.as_ref())
        .await?;

    if report.all_failed() {
        return Err(TaskError::AllSegmentsFailed {
            failed: report.failed.len(),
        });
    }

    let mut result = serde_json::to_value(&report).map_err(crate::db::DatabaseError::from)?;
    result["redirect_url"] = json!(tape_redirect(tape.id));
    result["partial_failure"] = json!(!report.failed.is_empty());
    Ok(TaskOutcome::new(result).with_detail(report.summary()))
}
