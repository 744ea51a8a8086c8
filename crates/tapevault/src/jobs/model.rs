//! Job identity, lifecycle states and the client-facing view.

use serde::{Deserialize, Serialize};

use super::error::JobError;
use crate::db::job_repo::{JobFilter, JobRow};

/// Target id shared by every ingest job.
pub const INBOX_TARGET: &str = "inbox";

/// Target id for jobs operating on one tape.
pub fn tape_target(tape_id: i64) -> String {
    format!("tape:{}", tape_id)
}

/// Parses a `tape:<id>` target.
pub fn parse_tape_target(target_id: &str) -> Option<i64> {
    target_id.strip_prefix("tape:")?.parse().ok()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    IngestAll,
    IngestOne,
    AnalyzeTape,
    ExportSegments,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::IngestAll => "ingest_all",
            JobType::IngestOne => "ingest_one",
            JobType::AnalyzeTape => "analyze_tape",
            JobType::ExportSegments => "export_segments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest_all" => Some(JobType::IngestAll),
            "ingest_one" => Some(JobType::IngestOne),
            "analyze_tape" => Some(JobType::AnalyzeTape),
            "export_segments" => Some(JobType::ExportSegments),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. `queued -> running -> {success, failed, canceled}`, and
/// any active state may become `stale` during startup reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Stale,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Stale => "stale",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            "stale" => Some(JobStatus::Stale),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub job_id: String,
    pub job_type: JobType,
    pub target_id: String,
    pub status: JobStatus,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobView {
    pub fn from_row(row: &JobRow) -> Result<Self, JobError> {
        let job_type = JobType::parse(&row.job_type).ok_or_else(|| {
            JobError::InvalidRecord(format!("job {} has unknown type '{}'", row.id, row.job_type))
        })?;
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            JobError::InvalidRecord(format!("job {} has unknown status '{}'", row.id, row.status))
        })?;
        let result = match row.result_json.as_deref() {
            Some(json) => match serde_json::from_str(json) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!("Unreadable result_json for job {}: {}", row.id, e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            job_id: row.id.clone(),
            job_type,
            target_id: row.target_id.clone(),
            status,
            percent: row.percent.min(100),
            current_step: row.current_step.clone(),
            detail: row.detail.clone(),
            error_text: row.error_text.clone(),
            result,
            retry_of: row.retry_of.clone(),
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Where a client should navigate once the job succeeded.
    pub fn redirect_url(&self) -> Option<&str> {
        self.result.as_ref()?.get("redirect_url")?.as_str()
    }
}

/// Filter for [`super::JobRunner::list`].
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub target_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl From<&JobListFilter> for JobFilter {
    fn from(filter: &JobListFilter) -> Self {
        JobFilter {
            status: filter.status.map(|s| s.as_str().to_string()),
            job_type: filter.job_type.map(|t| t.as_str().to_string()),
            target_id: filter.target_id.clone(),
            limit: filter.limit,
            offset: filter.offset,
        }
    }
}
