//! Tape repository.
//!
//! Only the columns the job pipeline reads or writes are modelled here;
//! descriptive metadata belongs to the catalog layer.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{timestamp, Database, DatabaseError};

pub const STATUS_NEW: &str = "New";
pub const STATUS_INGESTED: &str = "Ingested";

pub const BACKUP_DONE: &str = "backed_up";
pub const BACKUP_NEEDED: &str = "needs_backup";

#[derive(Debug, Clone, PartialEq)]
pub struct TapeRow {
    pub id: i64,
    pub tape_code: String,
    pub title: Option<String>,
    pub raw_path: Option<String>,
    pub raw_filename: Option<String>,
    pub sha256: Option<String>,
    pub status: String,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: Option<i64>,
    pub thumb_path: Option<String>,
    pub backup_status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TapeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tape_code: row.get("tape_code")?,
            title: row.get("title")?,
            raw_path: row.get("raw_path")?,
            raw_filename: row.get("raw_filename")?,
            sha256: row.get("sha256")?,
            status: row.get("status")?,
            duration_seconds: row.get("duration_seconds")?,
            file_size_bytes: row.get("file_size_bytes")?,
            thumb_path: row.get("thumb_path")?,
            backup_status: row.get("backup_status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Duration in whole milliseconds, when probed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * 1000.0).round() as i64)
    }
}

/// Fields for a new tape. The code is allocated by [`insert`].
#[derive(Debug, Clone, Default)]
pub struct NewTape {
    pub title: Option<String>,
    pub raw_path: Option<String>,
    pub raw_filename: Option<String>,
    pub sha256: Option<String>,
    pub file_size_bytes: Option<i64>,
}

/// Raw file attachment written after ingest.
#[derive(Debug, Clone)]
pub struct RawFile<'a> {
    pub raw_path: &'a str,
    pub raw_filename: &'a str,
    pub sha256: &'a str,
    pub file_size_bytes: i64,
}

fn find_in(conn: &Connection, id: i64) -> Result<Option<TapeRow>, rusqlite::Error> {
    conn.query_row("SELECT * FROM tapes WHERE id = ?1", params![id], TapeRow::from_row)
        .optional()
}

fn next_tape_code(conn: &Connection) -> Result<String, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT tape_code FROM tapes WHERE tape_code LIKE 'TAPE_%'")?;
    let max = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .filter_map(|code| code.ok())
        .filter_map(|code| code.trim_start_matches("TAPE_").parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    Ok(format!("TAPE_{:04}", max + 1))
}

/// Inserts a tape with the next free `TAPE_nnnn` code.
pub fn insert(db: &Database, tape: &NewTape) -> Result<TapeRow, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let code = next_tape_code(&tx)?;
        let now = timestamp();
        let status = if tape.raw_path.is_some() {
            STATUS_INGESTED
        } else {
            STATUS_NEW
        };
        tx.execute(
            "INSERT INTO tapes (tape_code, title, raw_path, raw_filename, sha256, status,
             file_size_bytes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                code,
                tape.title,
                tape.raw_path,
                tape.raw_filename,
                tape.sha256,
                status,
                tape.file_size_bytes,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        find_in(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity: "tape",
            id: id.to_string(),
        })
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<TapeRow>, DatabaseError> {
    db.with_conn(|conn| Ok(find_in(conn, id)?))
}

/// Looks up a tape by content hash.
pub fn find_by_sha256(db: &Database, sha256: &str) -> Result<Option<TapeRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM tapes WHERE sha256 = ?1 ORDER BY id LIMIT 1",
                params![sha256],
                TapeRow::from_row,
            )
            .optional()?)
    })
}

pub fn list(db: &Database) -> Result<Vec<TapeRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM tapes ORDER BY id")?;
        let rows = stmt
            .query_map([], TapeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

fn update_one(
    db: &Database,
    id: i64,
    sql: &str,
    values: &[&dyn rusqlite::types::ToSql],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(sql, values)?;
        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "tape",
                id: id.to_string(),
            });
        }
        Ok(())
    })
}

/// Attaches an ingested raw file to an existing tape.
pub fn attach_raw_file(db: &Database, id: i64, raw: &RawFile<'_>) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE tapes SET raw_path = ?2, raw_filename = ?3, sha256 = ?4, file_size_bytes = ?5,
         status = ?6, updated_at = ?7 WHERE id = ?1",
        params![
            id,
            raw.raw_path,
            raw.raw_filename,
            raw.sha256,
            raw.file_size_bytes,
            STATUS_INGESTED,
            timestamp()
        ],
    )
}

/// Stores probe results.
pub fn update_media_info(
    db: &Database,
    id: i64,
    duration_seconds: Option<f64>,
    file_size_bytes: Option<i64>,
) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE tapes SET duration_seconds = COALESCE(?2, duration_seconds),
         file_size_bytes = COALESCE(?3, file_size_bytes), updated_at = ?4 WHERE id = ?1",
        params![id, duration_seconds, file_size_bytes, timestamp()],
    )
}

pub fn set_thumb_path(db: &Database, id: i64, thumb_path: &str) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE tapes SET thumb_path = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, thumb_path, timestamp()],
    )
}

pub fn set_backup_status(db: &Database, id: i64, status: &str) -> Result<(), DatabaseError> {
    update_one(
        db,
        id,
        "UPDATE tapes SET backup_status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, timestamp()],
    )
}
