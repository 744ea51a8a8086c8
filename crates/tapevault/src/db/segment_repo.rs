//! Segment repository: suggested, accepted, ignored and exported ranges of a tape.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{timestamp, Database, DatabaseError};

pub const STATUS_SUGGESTED: &str = "suggested";
pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_IGNORED: &str = "ignored";
pub const STATUS_EXPORTED: &str = "exported";

/// A raw segment row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    pub id: i64,
    pub tape_id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub status: String,
    pub output_path: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl SegmentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tape_id: row.get("tape_id")?,
            start_ms: row.get("start_ms")?,
            end_ms: row.get("end_ms")?,
            status: row.get("status")?,
            output_path: row.get("output_path")?,
            confidence: row.get("confidence")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.start_ms < end_ms && start_ms < self.end_ms
    }
}

/// A segment to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: Option<f64>,
}

fn validate_range(start_ms: i64, end_ms: i64) -> Result<(), DatabaseError> {
    if start_ms < 0 || end_ms <= start_ms {
        return Err(DatabaseError::Constraint(format!(
            "invalid segment range {}..{}",
            start_ms, end_ms
        )));
    }
    Ok(())
}

fn find_in(conn: &Connection, id: i64) -> Result<Option<SegmentRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT * FROM segments WHERE id = ?1",
        params![id],
        SegmentRow::from_row,
    )
    .optional()
}

fn list_in(conn: &Connection, tape_id: i64) -> Result<Vec<SegmentRow>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT * FROM segments WHERE tape_id = ?1 ORDER BY start_ms, id")?;
    let rows = stmt
        .query_map(params![tape_id], SegmentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns the accepted/exported segment of the same tape that overlaps the range.
fn overlapping_kept(
    conn: &Connection,
    tape_id: i64,
    exclude_id: i64,
    start_ms: i64,
    end_ms: i64,
) -> Result<Option<SegmentRow>, rusqlite::Error> {
    Ok(list_in(conn, tape_id)?.into_iter().find(|s| {
        s.id != exclude_id
            && (s.status == STATUS_ACCEPTED || s.status == STATUS_EXPORTED)
            && s.overlaps(start_ms, end_ms)
    }))
}

/// Inserts one segment with an explicit status and returns its id.
pub fn insert(
    db: &Database,
    tape_id: i64,
    segment: &NewSegment,
    status: &str,
) -> Result<i64, DatabaseError> {
    validate_range(segment.start_ms, segment.end_ms)?;
    db.with_conn(|conn| {
        if status == STATUS_ACCEPTED || status == STATUS_EXPORTED {
            if let Some(other) =
                overlapping_kept(conn, tape_id, -1, segment.start_ms, segment.end_ms)?
            {
                return Err(DatabaseError::Constraint(format!(
                    "segment overlaps segment {}",
                    other.id
                )));
            }
        }
        let now = timestamp();
        conn.execute(
            "INSERT INTO segments (tape_id, start_ms, end_ms, status, confidence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                tape_id,
                segment.start_ms,
                segment.end_ms,
                status,
                segment.confidence,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Replaces the tape's `suggested` rows with a fresh set in one transaction.
///
/// Accepted, ignored and exported rows are left untouched.
pub fn replace_suggestions(
    db: &Database,
    tape_id: i64,
    suggestions: &[NewSegment],
) -> Result<usize, DatabaseError> {
    for s in suggestions {
        validate_range(s.start_ms, s.end_ms)?;
    }
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM segments WHERE tape_id = ?1 AND status = ?2",
            params![tape_id, STATUS_SUGGESTED],
        )?;
        let now = timestamp();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO segments (tape_id, start_ms, end_ms, status, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )?;
            for s in suggestions {
                stmt.execute(params![
                    tape_id,
                    s.start_ms,
                    s.end_ms,
                    STATUS_SUGGESTED,
                    s.confidence,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(suggestions.len())
    })
}

/// Finds a segment by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<SegmentRow>, DatabaseError> {
    db.with_conn(|conn| Ok(find_in(conn, id)?))
}

/// All segments of a tape ordered by start time.
pub fn list_for_tape(db: &Database, tape_id: i64) -> Result<Vec<SegmentRow>, DatabaseError> {
    db.with_conn(|conn| Ok(list_in(conn, tape_id)?))
}

/// Segments of a tape with one of the given statuses, ordered by start time.
pub fn list_by_status(
    db: &Database,
    tape_id: i64,
    statuses: &[&str],
) -> Result<Vec<SegmentRow>, DatabaseError> {
    Ok(list_for_tape(db, tape_id)?
        .into_iter()
        .filter(|s| statuses.contains(&s.status.as_str()))
        .collect())
}

/// Accepts a segment, rejecting it if it overlaps another kept segment.
pub fn accept(db: &Database, id: i64) -> Result<SegmentRow, DatabaseError> {
    db.with_conn(|conn| {
        let seg = find_in(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity: "segment",
            id: id.to_string(),
        })?;
        if seg.status == STATUS_ACCEPTED || seg.status == STATUS_EXPORTED {
            return Ok(seg);
        }
        if let Some(other) = overlapping_kept(conn, seg.tape_id, seg.id, seg.start_ms, seg.end_ms)? {
            return Err(DatabaseError::Constraint(format!(
                "segment {} overlaps segment {}",
                seg.id, other.id
            )));
        }
        conn.execute(
            "UPDATE segments SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, STATUS_ACCEPTED, timestamp()],
        )?;
        find_in(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity: "segment",
            id: id.to_string(),
        })
    })
}

/// Accepts every suggestion of the tape that does not overlap a kept segment.
///
/// Returns the number of segments accepted.
pub fn accept_all_suggested(db: &Database, tape_id: i64) -> Result<usize, DatabaseError> {
    let suggested = list_by_status(db, tape_id, &[STATUS_SUGGESTED])?;
    let mut accepted = 0;
    for seg in suggested {
        match accept(db, seg.id) {
            Ok(_) => accepted += 1,
            Err(DatabaseError::Constraint(reason)) => {
                log::warn!("Skipping suggestion {}: {}", seg.id, reason);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(accepted)
}

/// Marks a segment ignored.
pub fn ignore(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE segments SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, STATUS_IGNORED, timestamp()],
        )?;
        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "segment",
                id: id.to_string(),
            });
        }
        Ok(())
    })
}

/// Records a successful export.
pub fn mark_exported(db: &Database, id: i64, output_path: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE segments SET status = ?2, output_path = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, STATUS_EXPORTED, output_path, timestamp()],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tape_repo::{self, NewTape};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let tape_id = tape_repo::insert(&db, &NewTape::default()).unwrap().id;
        (db, tape_id)
    }

    fn seg(start_ms: i64, end_ms: i64) -> NewSegment {
        NewSegment {
            start_ms,
            end_ms,
            confidence: None,
        }
    }

    #[test]
    fn test_replace_suggestions_keeps_decided_rows() {
        let (db, tape) = setup();
        replace_suggestions(&db, tape, &[seg(0, 1000), seg(1000, 2000), seg(2000, 3000)]).unwrap();

        let rows = list_for_tape(&db, tape).unwrap();
        accept(&db, rows[0].id).unwrap();
        ignore(&db, rows[1].id).unwrap();

        replace_suggestions(&db, tape, &[seg(1500, 2500)]).unwrap();

        let rows = list_for_tape(&db, tape).unwrap();
        let statuses: Vec<&str> = rows.iter().map(|s| s.status.as_str()).collect();
        assert_eq!(statuses, vec!["accepted", "ignored", "suggested"]);
        assert_eq!(rows[2].start_ms, 1500);
    }

    #[test]
    fn test_replace_suggestions_rejects_bad_range() {
        let (db, tape) = setup();
        assert!(matches!(
            replace_suggestions(&db, tape, &[seg(500, 500)]),
            Err(DatabaseError::Constraint(_))
        ));
    }

    #[test]
    fn test_accept_rejects_overlap() {
        let (db, tape) = setup();
        replace_suggestions(&db, tape, &[seg(0, 2000), seg(1000, 3000)]).unwrap();
        let rows = list_for_tape(&db, tape).unwrap();

        accept(&db, rows[0].id).unwrap();
        let err = accept(&db, rows[1].id).unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert_eq!(find_by_id(&db, rows[1].id).unwrap().unwrap().status, "suggested");
    }

    #[test]
    fn test_accept_all_suggested_skips_overlaps() {
        let (db, tape) = setup();
        insert(&db, tape, &seg(0, 1500), STATUS_ACCEPTED).unwrap();
        replace_suggestions(&db, tape, &[seg(1000, 2000), seg(2000, 3000)]).unwrap();

        assert_eq!(accept_all_suggested(&db, tape).unwrap(), 1);
        let accepted = list_by_status(&db, tape, &[STATUS_ACCEPTED]).unwrap();
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn test_mark_exported_sets_path() {
        let (db, tape) = setup();
        let id = insert(&db, tape, &seg(0, 1000), STATUS_ACCEPTED).unwrap();
        mark_exported(&db, id, "/out/segment_1.mp4").unwrap();

        let row = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.status, STATUS_EXPORTED);
        assert_eq!(row.output_path.as_deref(), Some("/out/segment_1.mp4"));
        assert_eq!(row.duration_ms(), 1000);
    }

    #[test]
    fn test_ignore_missing_segment() {
        let (db, _) = setup();
        assert!(matches!(
            ignore(&db, 999),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
