//! Progress reporting for running jobs.
//!
//! Every job owns a [`JobProgress`]: a `watch` channel holding the latest
//! [`ProgressSnapshot`] for pollers, a broadcast of [`JobProgressEvent`]s for
//! streaming subscribers, and a throttled write-through to the `jobs` row so
//! a restarted process can still show where a job got to.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use super::model::{JobStatus, JobType};
use crate::db::{job_repo, timestamp, Database};

/// Latest in-memory state of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub percent: u8,
    pub current_step: Option<String>,
    pub detail: Option<String>,
    pub error_text: Option<String>,
    pub updated_at: String,
}

impl ProgressSnapshot {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            percent: 0,
            current_step: Some("Queued".to_string()),
            detail: None,
            error_text: None,
            updated_at: timestamp(),
        }
    }
}

/// Progress event for streaming subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub job_type: JobType,
    pub target_id: String,
    pub status: JobStatus,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fans job progress events out to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Sink for task progress.
pub trait ProgressReporter: Send + Sync {
    /// Reports overall completion in `0..=100` plus a short step label.
    fn report(&self, percent: u8, step: &str, detail: Option<&str>);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: u8, _step: &str, _detail: Option<&str>) {}
}

/// Drives `work` to completion, reporting elapsed time every `every`.
///
/// The percent creeps from `from` toward `to` as the elapsed time nears
/// `budget`, and stays below `to` until `work` finishes.
pub async fn report_while<F: Future>(
    work: F,
    progress: &dyn ProgressReporter,
    step: &str,
    detail: &str,
    (from, to): (u8, u8),
    every: Duration,
    budget: Duration,
) -> F::Output {
    let every = every.max(Duration::from_millis(1));
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval_at(started + every, every);
    let room = u128::from(to.saturating_sub(from).saturating_sub(1));
    let budget_ms = budget.as_millis().max(1);
    tokio::pin!(work);

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => {
                let elapsed = started.elapsed();
                let gained = (room * elapsed.as_millis() / budget_ms).min(room) as u8;
                progress.report(
                    from + gained,
                    step,
                    Some(&format!("{} ({}s elapsed)", detail, elapsed.as_secs())),
                );
            }
        }
    }
}

/// Progress channel of one job.
pub struct JobProgress {
    job_id: String,
    job_type: JobType,
    target_id: String,
    db: Database,
    broadcaster: JobProgressBroadcaster,
    tx: watch::Sender<ProgressSnapshot>,
    flush_interval: Duration,
    last_flush: Mutex<Option<Instant>>,
}

impl JobProgress {
    pub fn new(
        job_id: &str,
        job_type: JobType,
        target_id: &str,
        db: Database,
        broadcaster: JobProgressBroadcaster,
        flush_interval: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::queued());
        Self {
            job_id: job_id.to_string(),
            job_type,
            target_id: target_id.to_string(),
            db,
            broadcaster,
            tx,
            flush_interval,
            last_flush: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Marks the job running in memory.
    pub(crate) fn set_running(&self) {
        self.tx.send_modify(|snap| {
            snap.status = JobStatus::Running;
            snap.current_step = Some("Starting".to_string());
            snap.updated_at = timestamp();
        });
        self.broadcast();
    }

    /// Publishes the terminal state. The caller has already persisted it.
    pub(crate) fn set_terminal(
        &self,
        status: JobStatus,
        percent: u8,
        current_step: Option<String>,
        detail: Option<String>,
        error_text: Option<String>,
    ) {
        self.tx.send_modify(|snap| {
            snap.status = status;
            snap.percent = snap.percent.max(percent.min(100));
            snap.current_step = current_step;
            snap.detail = detail;
            snap.error_text = error_text;
            snap.updated_at = timestamp();
        });
        self.broadcast();
    }

    fn broadcast(&self) {
        let snap = self.snapshot();
        self.broadcaster.send(JobProgressEvent {
            job_id: self.job_id.clone(),
            job_type: self.job_type,
            target_id: self.target_id.clone(),
            status: snap.status,
            percent: snap.percent,
            current_step: snap.current_step,
            detail: snap.detail,
            error: snap.error_text,
            timestamp: Utc::now(),
        });
    }

    fn flush_due(&self) -> bool {
        let mut last = match self.last_flush.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Progress flush lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.flush_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn flush(&self, snap: &ProgressSnapshot) {
        let result = job_repo::update_progress(
            &self.db,
            &self.job_id,
            snap.percent,
            snap.current_step.as_deref(),
            snap.detail.as_deref(),
            &snap.updated_at,
        );
        if let Err(e) = result {
            tracing::warn!(
                event = "progress_flush_failed",
                job_id = %self.job_id,
                error = %e,
                "Failed to persist job progress"
            );
        }
    }
}

impl ProgressReporter for JobProgress {
    fn report(&self, percent: u8, step: &str, detail: Option<&str>) {
        let mut accepted = false;
        self.tx.send_if_modified(|snap| {
            if snap.status != JobStatus::Running {
                return false;
            }
            snap.percent = snap.percent.max(percent.min(100));
            snap.current_step = Some(step.to_string());
            snap.detail = detail.map(str::to_string);
            snap.updated_at = timestamp();
            accepted = true;
            true
        });
        if !accepted {
            return;
        }

        self.broadcast();
        if self.flush_due() {
            self.flush(&self.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::JobRow;

    fn running_progress(db: &Database, flush_interval: Duration) -> JobProgress {
        let now = timestamp();
        job_repo::insert(
            db,
            &JobRow {
                id: "job-1".to_string(),
                job_type: "analyze_tape".to_string(),
                target_id: "tape:1".to_string(),
                status: "queued".to_string(),
                percent: 0,
                current_step: None,
                detail: None,
                error_text: None,
                payload_json: None,
                result_json: None,
                process_epoch: "epoch".to_string(),
                retry_of: None,
                created_at: now.clone(),
                updated_at: now.clone(),
                started_at: None,
                finished_at: None,
            },
        )
        .unwrap();
        job_repo::mark_running(db, "job-1", &now).unwrap();

        let progress = JobProgress::new(
            "job-1",
            JobType::AnalyzeTape,
            "tape:1",
            db.clone(),
            JobProgressBroadcaster::default(),
            flush_interval,
        );
        progress.set_running();
        progress
    }

    #[test]
    fn test_percent_never_decreases() {
        let db = Database::open_in_memory().unwrap();
        let progress = running_progress(&db, Duration::from_secs(60));

        progress.report(40, "Probing", None);
        progress.report(20, "Thumbnail", Some("late report"));
        let snap = progress.snapshot();
        assert_eq!(snap.percent, 40);
        assert_eq!(snap.current_step.as_deref(), Some("Thumbnail"));

        progress.report(250, "Done", None);
        assert_eq!(progress.snapshot().percent, 100);
    }

    #[test]
    fn test_reports_ignored_before_running_and_after_terminal() {
        let db = Database::open_in_memory().unwrap();
        let progress = JobProgress::new(
            "job-x",
            JobType::IngestAll,
            "inbox",
            db,
            JobProgressBroadcaster::default(),
            Duration::ZERO,
        );
        progress.report(50, "Copying", None);
        assert_eq!(progress.snapshot().percent, 0);
        assert_eq!(progress.snapshot().status, JobStatus::Queued);

        progress.set_running();
        progress.set_terminal(JobStatus::Failed, 10, None, None, Some("boom".to_string()));
        progress.report(90, "Copying", None);
        let snap = progress.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.percent, 10);
    }

    #[test]
    fn test_first_report_is_flushed_then_throttled() {
        let db = Database::open_in_memory().unwrap();
        let progress = running_progress(&db, Duration::from_secs(60));

        progress.report(10, "Probing", None);
        progress.report(30, "Scanning", None);

        let row = job_repo::find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.percent, 10);
        assert_eq!(row.current_step.as_deref(), Some("Probing"));
    }

    #[test]
    fn test_zero_interval_flushes_every_report() {
        let db = Database::open_in_memory().unwrap();
        let progress = running_progress(&db, Duration::ZERO);

        progress.report(10, "Probing", None);
        progress.report(30, "Scanning", Some("frame scores"));

        let row = job_repo::find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.percent, 30);
        assert_eq!(row.detail.as_deref(), Some("frame scores"));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let db = Database::open_in_memory().unwrap();
        let broadcaster = JobProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        let progress = JobProgress::new(
            "job-2",
            JobType::ExportSegments,
            "tape:4",
            db,
            broadcaster,
            Duration::from_secs(60),
        );

        progress.set_running();
        progress.report(55, "Exporting", Some("segment 2/4"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, JobStatus::Running);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.percent, 55);
        assert_eq!(second.detail.as_deref(), Some("segment 2/4"));

        let json = serde_json::to_value(&second).unwrap();
        assert_eq!(json["jobId"], "job-2");
        assert_eq!(json["currentStep"], "Exporting");
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u8, String)>>);

    impl ProgressReporter for Recorder {
        fn report(&self, percent: u8, _step: &str, detail: Option<&str>) {
            self.0
                .lock()
                .unwrap()
                .push((percent, detail.unwrap_or_default().to_string()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_step_reports_elapsed_time() {
        let recorder = Recorder::default();
        let work = async {
            tokio::time::sleep(Duration::from_secs(35)).await;
            7
        };

        let out = report_while(
            work,
            &recorder,
            "Scene analysis",
            "Computing frame differences",
            (35, 80),
            Duration::from_secs(10),
            Duration::from_secs(100),
        )
        .await;

        assert_eq!(out, 7);
        let reports = recorder.0.into_inner().unwrap();
        assert_eq!(
            reports,
            vec![
                (39, "Computing frame differences (10s elapsed)".to_string()),
                (43, "Computing frame differences (20s elapsed)".to_string()),
                (48, "Computing frame differences (30s elapsed)".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_step_stays_below_span_end() {
        let recorder = Recorder::default();
        report_while(
            tokio::time::sleep(Duration::from_secs(55)),
            &recorder,
            "Scene analysis",
            "Scanning",
            (35, 80),
            Duration::from_secs(10),
            Duration::from_secs(20),
        )
        .await;

        let percents: Vec<u8> = recorder.0.into_inner().unwrap().iter().map(|r| r.0).collect();
        assert_eq!(percents.len(), 5);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last().copied(), Some(79));
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_terminal_state() {
        let db = Database::open_in_memory().unwrap();
        let progress = JobProgress::new(
            "job-3",
            JobType::AnalyzeTape,
            "tape:9",
            db,
            JobProgressBroadcaster::default(),
            Duration::from_secs(60),
        );
        let mut rx = progress.subscribe();
        progress.set_running();
        progress.set_terminal(JobStatus::Success, 100, Some("Done".to_string()), None, None);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, JobStatus::Success);
    }
}
