//! Sync metadata store (pull watermarks and other key/value state).

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::{Error, Result};

use super::Database;

/// Key/value store for durable sync bookkeeping.
pub struct SyncMetaStore {
    db: Database,
}

impl SyncMetaStore {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// The watermark of the last successful pull for `user_id`, if any.
    pub fn watermark(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get(&watermark_key(user_id))? else {
            return Ok(None);
        };
        let parsed = raw
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::InvalidInput(format!("bad watermark: {e}")))?;
        Ok(Some(parsed))
    }

    /// Record a new pull watermark for `user_id`.
    pub fn set_watermark(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.set(&watermark_key(user_id), &at.to_rfc3339())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            );
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }
}

fn watermark_key(user_id: &str) -> String {
    format!("pull_watermark:{user_id}")
}
