//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;

/// Shared handle to the local SQLite database.
///
/// The connection is behind a mutex so the async sync engine and concurrent
/// UI-driven mutations can interleave safely; every access is a short
/// synchronous critical section.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let database = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        database.configure()?;
        database.with_conn(migrations::run)?;
        Ok(database)
    }

    /// Configure `SQLite` for a local multi-reader workload.
    fn configure(&self) -> Result<()> {
        self.with_conn(|conn| {
            // WAL is unavailable for in-memory databases
            conn.pragma_update(None, "journal_mode", "WAL").ok();
            conn.pragma_update(None, "synchronous", "NORMAL").ok();
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
    }

    /// Run a closure against the locked connection.
    ///
    /// A poisoned lock is recovered rather than propagated: the connection
    /// itself stays valid, and SQLite transactions protect row consistency.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='pending_changes'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_creates_file_database() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("packrat.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_meta (key, value) VALUES ('probe', '1')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }
}
