//! Review queue repository.
//!
//! At most one open item exists per (tape, type): [`create`] resolves the
//! previous open item of the same type before inserting.

use rusqlite::{params, Connection, Row};

use super::{timestamp, Database, DatabaseError};

pub const NEEDS_BACKUP: &str = "needs_backup";
pub const NEEDS_EXPORT_REVIEW: &str = "needs_export_review";
pub const NEEDS_METADATA: &str = "needs_metadata";
pub const NEEDS_SPLIT_REVIEW: &str = "needs_split_review";

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItemRow {
    pub id: i64,
    pub tape_id: Option<i64>,
    pub item_type: String,
    pub message: String,
    pub payload_json: Option<String>,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl ReviewItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tape_id: row.get("tape_id")?,
            item_type: row.get("item_type")?,
            message: row.get("message")?,
            payload_json: row.get("payload_json")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            resolved_at: row.get("resolved_at")?,
        })
    }

    /// Decoded payload, if any.
    pub fn payload(&self) -> Result<Option<serde_json::Value>, DatabaseError> {
        self.payload_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(DatabaseError::from)
    }
}

fn resolve_in(
    conn: &Connection,
    tape_id: i64,
    item_type: &str,
    now: &str,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE review_items SET status = 'resolved', resolved_at = ?3
         WHERE tape_id = ?1 AND item_type = ?2 AND status = 'open'",
        params![tape_id, item_type, now],
    )
}

/// Opens a review item, resolving any earlier open item of the same type.
pub fn create(
    db: &Database,
    tape_id: i64,
    item_type: &str,
    message: &str,
    payload: Option<&serde_json::Value>,
) -> Result<i64, DatabaseError> {
    let payload_json = payload.map(serde_json::to_string).transpose()?;
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let now = timestamp();
        resolve_in(&tx, tape_id, item_type, &now)?;
        tx.execute(
            "INSERT INTO review_items (tape_id, item_type, message, payload_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'open', ?5)",
            params![tape_id, item_type, message, payload_json, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    })
}

/// Resolves the open items of one type for a tape.
pub fn resolve_open(db: &Database, tape_id: i64, item_type: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| Ok(resolve_in(conn, tape_id, item_type, &timestamp())?))
}

/// Open items for a tape, oldest first.
pub fn list_open(db: &Database, tape_id: i64) -> Result<Vec<ReviewItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM review_items WHERE tape_id = ?1 AND status = 'open' ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![tape_id], ReviewItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_open(db: &Database, tape_id: i64, item_type: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM review_items WHERE tape_id = ?1 AND item_type = ?2 AND status = 'open'",
            params![tape_id, item_type],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
