//! Job lifecycle supervision.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::context::{TaskContext, TaskOutcome};
use super::error::{JobError, TaskError};
use super::model::{tape_target, JobListFilter, JobStatus, JobType, JobView, INBOX_TARGET};
use super::progress::{JobProgress, JobProgressBroadcaster, JobProgressEvent};
use super::tasks;
use crate::config::{Config, ProjectPaths};
use crate::db::job_repo::{self, Completion, InsertOutcome, JobFilter, JobRow};
use crate::db::{timestamp, Database};
use crate::media::MediaTool;

/// `error_text` written during startup reconciliation.
pub const STALE_ERROR_TEXT: &str = "server restarted while job was running";

/// A job executing on this process.
struct LiveJob {
    view: JobView,
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
}

impl LiveJob {
    fn current_view(&self) -> JobView {
        let snap = self.progress.snapshot();
        let mut view = self.view.clone();
        view.status = snap.status;
        view.percent = snap.percent;
        view.current_step = snap.current_step;
        view.detail = snap.detail;
        view.error_text = snap.error_text;
        view.updated_at = snap.updated_at;
        view
    }
}

struct Shared {
    db: Database,
    config: Arc<Config>,
    paths: Arc<ProjectPaths>,
    tool: Arc<dyn MediaTool>,
    broadcaster: JobProgressBroadcaster,
    epoch: String,
    runtime: Handle,
    live: RwLock<HashMap<String, LiveJob>>,
}

impl Shared {
    fn live_read(&self) -> RwLockReadGuard<'_, HashMap<String, LiveJob>> {
        match self.live.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Live job map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn live_write(&self) -> RwLockWriteGuard<'_, HashMap<String, LiveJob>> {
        match self.live.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Live job map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Runs background jobs and answers status queries.
///
/// Cloning is cheap; all clones share the same live job table.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Shared>,
}

impl JobRunner {
    /// Creates a runner with a fresh process epoch.
    ///
    /// Active jobs left behind by an earlier process are marked stale before
    /// this returns, so no new job can collide with them. Must be called from
    /// within a tokio runtime.
    pub fn start(
        db: Database,
        config: Config,
        paths: ProjectPaths,
        tool: Arc<dyn MediaTool>,
    ) -> Result<Self, JobError> {
        let runtime = Handle::try_current().map_err(|e| JobError::Runtime(e.to_string()))?;
        let epoch = Uuid::new_v4().to_string();

        let reconciled = job_repo::mark_stale(&db, &epoch, STALE_ERROR_TEXT, &timestamp())?;
        if reconciled > 0 {
            warn!(
                event = "jobs_marked_stale",
                count = reconciled,
                "Marked jobs from a previous run as stale"
            );
        } else {
            info!(event = "jobs_marked_stale", count = 0, "No stale jobs found");
        }

        Ok(Self {
            inner: Arc::new(Shared {
                db,
                config: Arc::new(config),
                paths: Arc::new(paths),
                tool,
                broadcaster: JobProgressBroadcaster::default(),
                epoch,
                runtime,
                live: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Identifier of this runner instance, stored on every job it owns.
    pub fn epoch(&self) -> &str {
        &self.inner.epoch
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Streams progress events of every job run by this runner.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.inner.broadcaster.subscribe()
    }

    /// Persists a queued job and starts it. Returns without waiting.
    pub fn enqueue(
        &self,
        job_type: JobType,
        target_id: &str,
        payload: Value,
    ) -> Result<String, JobError> {
        self.enqueue_row(job_type, target_id, payload, None)
    }

    pub fn enqueue_ingest_all(&self) -> Result<String, JobError> {
        self.enqueue(JobType::IngestAll, INBOX_TARGET, json!({}))
    }

    pub fn enqueue_ingest_one(
        &self,
        filename: &str,
        tape_id: Option<i64>,
    ) -> Result<String, JobError> {
        let mut payload = json!({ "filename": filename });
        // Attaching to a tape locks that tape, not the inbox.
        let target = match tape_id {
            Some(tape_id) => {
                payload["tape_id"] = json!(tape_id);
                tape_target(tape_id)
            }
            None => INBOX_TARGET.to_string(),
        };
        self.enqueue(JobType::IngestOne, &target, payload)
    }

    pub fn enqueue_analyze(&self, tape_id: i64) -> Result<String, JobError> {
        self.enqueue(JobType::AnalyzeTape, &tape_target(tape_id), json!({}))
    }

    pub fn enqueue_export(&self, tape_id: i64, force: bool) -> Result<String, JobError> {
        self.enqueue(
            JobType::ExportSegments,
            &tape_target(tape_id),
            json!({ "force": force }),
        )
    }

    fn enqueue_row(
        &self,
        job_type: JobType,
        target_id: &str,
        payload: Value,
        retry_of: Option<String>,
    ) -> Result<String, JobError> {
        let shared = &self.inner;
        let now = timestamp();
        let row = JobRow {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.as_str().to_string(),
            target_id: target_id.to_string(),
            status: JobStatus::Queued.as_str().to_string(),
            percent: 0,
            current_step: Some("Queued".to_string()),
            detail: None,
            error_text: None,
            payload_json: Some(payload.to_string()),
            result_json: None,
            process_epoch: shared.epoch.clone(),
            retry_of,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            finished_at: None,
        };

        if let InsertOutcome::Conflict { active_job_id } = job_repo::insert_if_idle(&shared.db, &row)?
        {
            info!(
                event = "job_conflict",
                target_id = %target_id,
                active_job_id = %active_job_id,
                "Rejected job for busy target"
            );
            return Err(JobError::Conflict {
                target_id: target_id.to_string(),
                active_job_id,
            });
        }

        let view = JobView::from_row(&row)?;
        let progress = Arc::new(JobProgress::new(
            &row.id,
            job_type,
            target_id,
            shared.db.clone(),
            shared.broadcaster.clone(),
            shared.config.jobs.progress_flush_interval(),
        ));
        let cancel = CancellationToken::new();

        shared.live_write().insert(
            row.id.clone(),
            LiveJob {
                view,
                progress: Arc::clone(&progress),
                cancel: cancel.clone(),
            },
        );

        info!(
            event = "job_enqueued",
            job_id = %row.id,
            job_type = %job_type,
            target_id = %target_id,
            retry_of = row.retry_of.as_deref().unwrap_or(""),
            "Job queued"
        );

        let span = info_span!("job", job_id = %row.id, job_type = %job_type, target_id = %target_id);
        shared.runtime.spawn(
            execute(Arc::clone(shared), row.id.clone(), job_type, payload, progress, cancel)
                .instrument(span),
        );

        Ok(row.id)
    }

    /// Latest snapshot of a job. Never awaits.
    pub fn status(&self, job_id: &str) -> Result<JobView, JobError> {
        if let Some(live) = self.inner.live_read().get(job_id) {
            return Ok(live.current_view());
        }
        let row = job_repo::find_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        JobView::from_row(&row)
    }

    /// Requests cancellation. Returns false when the job is already terminal.
    pub fn cancel(&self, job_id: &str) -> Result<bool, JobError> {
        if let Some(live) = self.inner.live_read().get(job_id) {
            if live.progress.snapshot().status.is_terminal() {
                return Ok(false);
            }
            live.cancel.cancel();
            info!(event = "job_cancel_requested", job_id = %job_id, "Cancellation requested");
            return Ok(true);
        }

        let row = job_repo::find_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let view = JobView::from_row(&row)?;
        if view.is_terminal() {
            return Ok(false);
        }

        // Active row with no task on this process.
        let canceled = job_repo::finish(
            &self.inner.db,
            job_id,
            &Completion {
                status: JobStatus::Canceled.as_str(),
                percent: row.percent,
                current_step: Some("Canceled"),
                detail: None,
                error_text: Some("job was canceled"),
                result_json: None,
            },
            &timestamp(),
        )?;
        Ok(canceled)
    }

    /// Re-runs a failed, stale or canceled job as a new job.
    pub fn retry(&self, job_id: &str) -> Result<String, JobError> {
        let row = job_repo::find_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let view = JobView::from_row(&row)?;
        if !view.is_terminal() || view.status == JobStatus::Success {
            return Err(JobError::NotRetryable {
                job_id: job_id.to_string(),
                status: view.status.to_string(),
            });
        }

        let payload = match row.payload_json.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|e| {
                JobError::InvalidRecord(format!("job {} has unreadable payload: {}", job_id, e))
            })?,
            None => json!({}),
        };
        self.enqueue_row(view.job_type, &view.target_id, payload, Some(row.id))
    }

    /// Jobs matching `filter`, newest first, with the total match count.
    pub fn list(&self, filter: &JobListFilter) -> Result<(Vec<JobView>, u64), JobError> {
        let (rows, total) = job_repo::query(&self.inner.db, &JobFilter::from(filter))?;
        let live = self.inner.live_read();
        let views = rows
            .iter()
            .map(|row| match live.get(&row.id) {
                Some(job) => Ok(job.current_view()),
                None => JobView::from_row(row),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((views, total))
    }

    /// Waits until the job reaches a terminal state.
    pub async fn wait(&self, job_id: &str) -> Result<JobView, JobError> {
        let rx = self
            .inner
            .live_read()
            .get(job_id)
            .map(|live| live.progress.subscribe());

        if let Some(mut rx) = rx {
            loop {
                let done = rx.borrow_and_update().status.is_terminal();
                if done || rx.changed().await.is_err() {
                    break;
                }
            }
        }
        self.status(job_id)
    }
}

async fn execute(
    shared: Arc<Shared>,
    job_id: String,
    job_type: JobType,
    payload: Value,
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
) {
    let result = run_task(&shared, &job_id, job_type, payload, &progress, cancel).await;
    if let Some(result) = result {
        finalize(&shared, &job_id, &progress, result);
    }
    shared.live_write().remove(&job_id);
}

/// Moves the job to running and executes its body.
///
/// Returns `None` when the row left `queued` before the task started.
async fn run_task(
    shared: &Arc<Shared>,
    job_id: &str,
    job_type: JobType,
    payload: Value,
    progress: &Arc<JobProgress>,
    cancel: CancellationToken,
) -> Option<Result<TaskOutcome, TaskError>> {
    if cancel.is_cancelled() {
        return Some(Err(TaskError::Canceled));
    }

    match job_repo::mark_running(&shared.db, job_id, &timestamp()) {
        Ok(true) => {}
        Ok(false) => {
            warn!(event = "job_not_queued", "Job left the queued state before it started");
            if let Ok(Some(row)) = job_repo::find_by_id(&shared.db, job_id) {
                publish_row(progress, &row);
            }
            return None;
        }
        Err(e) => return Some(Err(TaskError::Database(e))),
    }
    progress.set_running();
    info!(event = "job_started", "Job started");

    let target_id = shared
        .live_read()
        .get(job_id)
        .map(|live| live.view.target_id.clone())
        .unwrap_or_default();
    let ctx = TaskContext {
        job_id: job_id.to_string(),
        target_id,
        payload,
        db: shared.db.clone(),
        config: Arc::clone(&shared.config),
        paths: Arc::clone(&shared.paths),
        tool: Arc::clone(&shared.tool),
        cancel,
        progress: Arc::clone(progress),
    };

    // A panicking task body surfaces as a JoinError instead of tearing down the runner.
    let handle = tokio::spawn(tasks::run(job_type, ctx).in_current_span());
    Some(match handle.await {
        Ok(result) => result,
        Err(e) => Err(TaskError::Panicked(panic_message(e))),
    })
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn finalize(
    shared: &Shared,
    job_id: &str,
    progress: &JobProgress,
    result: Result<TaskOutcome, TaskError>,
) {
    let last = progress.snapshot();
    let (status, percent, step, detail, error_text, result_json) = match &result {
        Ok(outcome) => (
            JobStatus::Success,
            100,
            "Done",
            outcome.detail.clone(),
            None,
            Some(outcome.result.to_string()),
        ),
        Err(e) if e.is_cancellation() => (
            JobStatus::Canceled,
            last.percent,
            "Canceled",
            last.detail.clone(),
            Some(e.to_string()),
            None,
        ),
        Err(e) => (
            JobStatus::Failed,
            last.percent,
            "Failed",
            last.detail.clone(),
            Some(e.to_string()),
            None,
        ),
    };

    let written = job_repo::finish(
        &shared.db,
        job_id,
        &Completion {
            status: status.as_str(),
            percent,
            current_step: Some(step),
            detail: detail.as_deref(),
            error_text: error_text.as_deref(),
            result_json: result_json.as_deref(),
        },
        &timestamp(),
    );

    match written {
        Ok(true) => {
            progress.set_terminal(status, percent, Some(step.to_string()), detail, error_text.clone());
        }
        Ok(false) => {
            warn!(event = "job_already_terminal", "Job reached a terminal state elsewhere");
            if let Ok(Some(row)) = job_repo::find_by_id(&shared.db, job_id) {
                publish_row(progress, &row);
            }
            return;
        }
        Err(e) => {
            error!(event = "job_finish_failed", error = %e, "Failed to persist job outcome");
            progress.set_terminal(status, percent, Some(step.to_string()), detail, error_text.clone());
        }
    }

    match status {
        JobStatus::Success => info!(event = "job_succeeded", "Job finished"),
        JobStatus::Canceled => info!(event = "job_canceled", "Job canceled"),
        _ => error!(
            event = "job_failed",
            error = error_text.as_deref().unwrap_or(""),
            "Job failed"
        ),
    }
}

/// Mirrors a persisted terminal row into the live snapshot.
fn publish_row(progress: &JobProgress, row: &JobRow) {
    match JobStatus::parse(&row.status) {
        Some(status) if status.is_terminal() => progress.set_terminal(
            status,
            row.percent,
            row.current_step.clone(),
            row.detail.clone(),
            row.error_text.clone(),
        ),
        _ => log::warn!("Job {} has non-terminal status '{}'", row.id, row.status),
    }
}
