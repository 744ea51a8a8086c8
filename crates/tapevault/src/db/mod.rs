//! SQLite persistence for tapes, segments, review items and jobs.
//!
//! One connection sits behind a mutex. A repository call that stays inside a
//! single [`Database::with_conn`] closure sees no interleaved writes, which is
//! what makes the check-then-insert in [`job_repo::insert_if_idle`] atomic.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod review_repo;
pub mod segment_repo;
pub mod tape_repo;

pub use error::DatabaseError;

/// Shared handle to the project database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating it and its directory if needed,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| DatabaseError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self::prepare(conn)?;
        log::info!("Opened database {}", path.display());
        Ok(db)
    }

    /// Fresh migrated database that lives only as long as the handle.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Current UTC time in the RFC 3339 form stored in every timestamp column.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
