//! Schema migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each pending
//! script runs in its own transaction together with the version bump, so a
//! failed script leaves the database at the previous version.

use rusqlite::Connection;

use super::error::DatabaseError;

/// Embedded scripts in apply order. Script `i` moves the schema to version `i + 1`.
const SCRIPTS: &[(&str, &str)] = &[
    ("create_tapes", include_str!("sql/001_create_tapes.sql")),
    ("create_segments", include_str!("sql/002_create_segments.sql")),
    ("create_review_items", include_str!("sql/003_create_review_items.sql")),
    ("create_jobs", include_str!("sql/004_create_jobs.sql")),
];

/// Version the schema is at once every script has run.
pub const LATEST_VERSION: u32 = SCRIPTS.len() as u32;

/// Current `user_version` of the database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

/// Applies every script newer than the database's schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    if current > LATEST_VERSION {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!("database is newer than this build (latest {})", LATEST_VERSION),
        });
    }

    for (version, (name, sql)) in (1u32..).zip(SCRIPTS).skip(current as usize) {
        log::info!("Applying schema v{} ({})", version, name);
        let fail = |e: rusqlite::Error| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(sql).map_err(fail)?;
        tx.pragma_update(None, "user_version", version).map_err(fail)?;
        tx.commit().map_err(fail)?;
    }
    Ok(())
}
