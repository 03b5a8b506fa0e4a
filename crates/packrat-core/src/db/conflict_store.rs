//! Durable staging area for sync conflicts.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::sync::SyncConflict;

use super::Database;

/// Persists staged conflicts so they survive process restarts.
///
/// A conflict has at most one unresolved row per entity; re-staging against
/// a newer server snapshot replaces it. Resolved rows are kept so a pull
/// can recognize a server state a resolution has already settled and not
/// re-open it.
pub struct ConflictStore {
    db: Database,
}

impl ConflictStore {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stage a conflict, replacing any unresolved one for the same entity.
    pub fn stage(&self, conflict: &SyncConflict) -> Result<()> {
        let data = serde_json::to_string(conflict)?;
        let server_at = server_updated_at(conflict).to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sync_conflicts
                 WHERE entity_type = ?1 AND entity_id = ?2 AND resolved = 0",
                params![conflict.entity_type.as_str(), conflict.entity_id],
            )?;
            conn.execute(
                "INSERT INTO sync_conflicts
                 (id, entity_type, entity_id, server_updated_at, data, resolved, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    conflict.id,
                    conflict.entity_type.as_str(),
                    conflict.entity_id,
                    server_at,
                    data,
                    conflict.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// All unresolved conflicts in staging order.
    pub fn unresolved(&self) -> Result<Vec<SyncConflict>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM sync_conflicts WHERE resolved = 0 ORDER BY timestamp ASC",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
    }

    /// Look up an unresolved conflict by id.
    pub fn get(&self, id: &str) -> Result<Option<SyncConflict>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT data FROM sync_conflicts WHERE id = ?1 AND resolved = 0",
                params![id],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Mark a conflict resolved. Resolution is terminal; the row stays so
    /// the settled server state is recognizable on later pulls.
    pub fn mark_resolved(&self, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE sync_conflicts SET resolved = 1 WHERE id = ?1 AND resolved = 0",
                params![id],
            )?;
            if rows == 0 {
                return Err(Error::NotFound("conflict", id.to_string()));
            }
            Ok(())
        })
    }

    /// Whether a resolution has already settled this exact server state for
    /// the entity.
    pub fn was_resolved(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        server_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT server_updated_at FROM sync_conflicts
                 WHERE entity_type = ?1 AND entity_id = ?2 AND resolved = 1",
            )?;
            let stored = stmt
                .query_map(params![entity_type.as_str(), entity_id], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stored.iter().any(|at| {
                DateTime::parse_from_rfc3339(at)
                    .map(|parsed| parsed.with_timezone(&Utc) == server_at)
                    .unwrap_or(false)
            }))
        })
    }
}

fn server_updated_at(conflict: &SyncConflict) -> DateTime<Utc> {
    conflict
        .server_version
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
        .map_or(conflict.timestamp, |at| at.with_timezone(&Utc))
}
