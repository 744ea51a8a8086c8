//! Job repository: persistence for the `jobs` table.
//!
//! Status values are stored as the snake_case strings produced by
//! `jobs::JobStatus::as_str`. Every transition out of an active status is
//! guarded by `WHERE status IN ('queued', 'running')`, so a terminal row is
//! never rewritten.

use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use super::{Database, DatabaseError};

const ACTIVE: &str = "('queued', 'running')";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub target_id: String,
    pub status: String,
    pub percent: u8,
    pub current_step: Option<String>,
    pub detail: Option<String>,
    pub error_text: Option<String>,
    pub payload_json: Option<String>,
    pub result_json: Option<String>,
    pub process_epoch: String,
    pub retry_of: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let percent: i64 = row.get("percent")?;
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            target_id: row.get("target_id")?,
            status: row.get("status")?,
            percent: percent.clamp(0, 100) as u8,
            current_step: row.get("current_step")?,
            detail: row.get("detail")?,
            error_text: row.get("error_text")?,
            payload_json: row.get("payload_json")?,
            result_json: row.get("result_json")?,
            process_epoch: row.get("process_epoch")?,
            retry_of: row.get("retry_of")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub target_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Outcome of [`insert_if_idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another job is already queued or running for the same target.
    Conflict { active_job_id: String },
}

/// Terminal write applied by [`finish`].
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub status: &'a str,
    pub percent: u8,
    pub current_step: Option<&'a str>,
    pub detail: Option<&'a str>,
    pub error_text: Option<&'a str>,
    pub result_json: Option<&'a str>,
}

fn insert_row(conn: &rusqlite::Connection, job: &JobRow) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO jobs (id, job_type, target_id, status, percent, current_step, detail,
         error_text, payload_json, result_json, process_epoch, retry_of, created_at,
         updated_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            job.id,
            job.job_type,
            job.target_id,
            job.status,
            job.percent,
            job.current_step,
            job.detail,
            job.error_text,
            job.payload_json,
            job.result_json,
            job.process_epoch,
            job.retry_of,
            job.created_at,
            job.updated_at,
            job.started_at,
            job.finished_at,
        ],
    )?;
    Ok(())
}

fn active_job_for(
    conn: &rusqlite::Connection,
    target_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT id FROM jobs WHERE target_id = ?1 AND status IN {ACTIVE} LIMIT 1"),
        params![target_id],
        |r| r.get(0),
    )
    .optional()
}

/// Inserts a job row unconditionally.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        insert_row(conn, job)?;
        Ok(())
    })
}

/// Inserts `job` unless another job is active for the same target.
///
/// The lookup and insert run in one transaction under the connection lock.
/// The partial unique index on `target_id` backs this up: a unique violation
/// is reported as a conflict rather than an error.
pub fn insert_if_idle(db: &Database, job: &JobRow) -> Result<InsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        if let Some(active_job_id) = active_job_for(&tx, &job.target_id)? {
            return Ok(InsertOutcome::Conflict { active_job_id });
        }

        match insert_row(&tx, job) {
            Ok(()) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                let active_job_id = active_job_for(&tx, &job.target_id)?.unwrap_or_default();
                return Ok(InsertOutcome::Conflict { active_job_id });
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count). Newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }
        if let Some(ref target_id) = filter.target_id {
            conditions.push(format!("target_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(target_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Moves a queued job to running. Returns false if it was not queued.
pub fn mark_running(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now],
        )?;
        Ok(n == 1)
    })
}

/// Writes a progress snapshot for a running job. Percent never decreases.
pub fn update_progress(
    db: &Database,
    id: &str,
    percent: u8,
    current_step: Option<&str>,
    detail: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE jobs SET percent = MAX(percent, ?2), current_step = ?3, detail = ?4,
             updated_at = ?5
             WHERE id = ?1 AND status = 'running'",
            params![id, percent.min(100), current_step, detail, now],
        )?;
        Ok(n == 1)
    })
}

/// Applies the single terminal transition of an active job.
///
/// Returns false when the job was already terminal (e.g. marked stale).
pub fn finish(
    db: &Database,
    id: &str,
    completion: &Completion<'_>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            &format!(
                "UPDATE jobs SET status = ?2, percent = MAX(percent, ?3), current_step = ?4,
                 detail = ?5, error_text = ?6, result_json = ?7, updated_at = ?8,
                 finished_at = ?8
                 WHERE id = ?1 AND status IN {ACTIVE}"
            ),
            params![
                id,
                completion.status,
                completion.percent.min(100),
                completion.current_step,
                completion.detail,
                completion.error_text,
                completion.result_json,
                now,
            ],
        )?;
        Ok(n == 1)
    })
}

/// Marks every active job owned by another process epoch as stale.
///
/// Returns the number of rows reconciled.
pub fn mark_stale(
    db: &Database,
    current_epoch: &str,
    error_text: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            &format!(
                "UPDATE jobs SET status = 'stale', error_text = ?2, updated_at = ?3,
                 finished_at = ?3
                 WHERE status IN {ACTIVE} AND process_epoch != ?1"
            ),
            params![current_epoch, error_text, now],
        )?;
        Ok(n)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str, target: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            job_type: "analyze_tape".to_string(),
            target_id: target.to_string(),
            status: "queued".to_string(),
            percent: 0,
            current_step: Some("Queued".to_string()),
            detail: None,
            error_text: None,
            payload_json: Some("{}".to_string()),
            result_json: None,
            process_epoch: "epoch-1".to_string(),
            retry_of: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1", "tape:1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.job_type, "analyze_tape");
        assert_eq!(found.status, "queued");
        assert_eq!(found.percent, 0);
        assert_eq!(found.process_epoch, "epoch-1");
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_idle_conflicts_on_active_target() {
        let db = test_db();
        assert_eq!(
            insert_if_idle(&db, &sample_job("a", "tape:1")).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            insert_if_idle(&db, &sample_job("b", "tape:1")).unwrap(),
            InsertOutcome::Conflict {
                active_job_id: "a".to_string()
            }
        );
        // Different target is independent.
        assert_eq!(
            insert_if_idle(&db, &sample_job("c", "tape:2")).unwrap(),
            InsertOutcome::Inserted
        );
        assert!(find_by_id(&db, "b").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_idle_after_terminal() {
        let db = test_db();
        insert_if_idle(&db, &sample_job("a", "tape:1")).unwrap();
        mark_running(&db, "a", "2026-01-01T00:00:01Z").unwrap();
        let done = Completion {
            status: "failed",
            percent: 40,
            current_step: Some("Failed"),
            detail: None,
            error_text: Some("boom"),
            result_json: None,
        };
        assert!(finish(&db, "a", &done, "2026-01-01T00:00:02Z").unwrap());

        assert_eq!(
            insert_if_idle(&db, &sample_job("b", "tape:1")).unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn test_progress_is_monotonic() {
        let db = test_db();
        insert(&db, &sample_job("p", "tape:1")).unwrap();
        assert!(mark_running(&db, "p", "t1").unwrap());

        update_progress(&db, "p", 50, Some("Scanning"), None, "t2").unwrap();
        update_progress(&db, "p", 30, Some("Writing"), None, "t3").unwrap();

        let row = find_by_id(&db, "p").unwrap().unwrap();
        assert_eq!(row.percent, 50);
        assert_eq!(row.current_step.as_deref(), Some("Writing"));
        assert_eq!(row.started_at.as_deref(), Some("t1"));
    }

    #[test]
    fn test_progress_ignored_unless_running() {
        let db = test_db();
        insert(&db, &sample_job("q", "tape:1")).unwrap();
        assert!(!update_progress(&db, "q", 10, None, None, "t").unwrap());
        assert_eq!(find_by_id(&db, "q").unwrap().unwrap().percent, 0);
    }

    #[test]
    fn test_finish_only_once() {
        let db = test_db();
        insert(&db, &sample_job("f", "tape:1")).unwrap();
        mark_running(&db, "f", "t1").unwrap();

        let ok = Completion {
            status: "success",
            percent: 100,
            current_step: Some("Done"),
            detail: None,
            error_text: None,
            result_json: Some(r#"{"redirect_url":"/tapes/1"}"#),
        };
        assert!(finish(&db, "f", &ok, "t2").unwrap());

        let late = Completion {
            status: "failed",
            error_text: Some("late"),
            ..ok.clone()
        };
        assert!(!finish(&db, "f", &late, "t3").unwrap());

        let row = find_by_id(&db, "f").unwrap().unwrap();
        assert_eq!(row.status, "success");
        assert_eq!(row.finished_at.as_deref(), Some("t2"));
        assert!(row.error_text.is_none());
    }

    #[test]
    fn test_mark_stale_skips_current_epoch() {
        let db = test_db();
        let mut old = sample_job("old", "tape:1");
        old.status = "running".to_string();
        old.process_epoch = "epoch-0".to_string();
        insert(&db, &old).unwrap();

        let mut queued_old = sample_job("old-q", "tape:2");
        queued_old.process_epoch = "epoch-0".to_string();
        insert(&db, &queued_old).unwrap();

        let mut current = sample_job("cur", "tape:3");
        current.process_epoch = "epoch-1".to_string();
        insert(&db, &current).unwrap();

        let n = mark_stale(&db, "epoch-1", "restarted", "t").unwrap();
        assert_eq!(n, 2);

        let row = find_by_id(&db, "old").unwrap().unwrap();
        assert_eq!(row.status, "stale");
        assert_eq!(row.error_text.as_deref(), Some("restarted"));
        assert_eq!(find_by_id(&db, "cur").unwrap().unwrap().status, "queued");
    }

    #[test]
    fn test_query_filters_and_pagination() {
        let db = test_db();
        for i in 0..6 {
            let mut job = sample_job(&format!("j{}", i), &format!("tape:{}", i));
            job.created_at = format!("2026-01-{:02}T00:00:00Z", i + 1);
            if i % 2 == 0 {
                job.job_type = "export_segments".to_string();
            }
            insert(&db, &job).unwrap();
        }

        let (rows, total) = query(
            &db,
            &JobFilter {
                job_type: Some("export_segments".to_string()),
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "j4");

        let (rows, total) = query(
            &db,
            &JobFilter {
                target_id: Some("tape:1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "j1");
    }
}
