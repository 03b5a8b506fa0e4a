//! Durable, append-only log of pending changes.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sync::{Change, ChangeOperation};

use super::Database;

/// FIFO log backing the push pipeline.
///
/// Changes are appended by the change tracker and drained in insertion
/// order (`seq`) by the push pipeline. Recording a change for an entity
/// that already has an unsynced change collapses the two in place, keeping
/// the earlier change's queue position so causal order is preserved.
/// Synced changes are never rewritten.
pub struct ChangeLog {
    db: Database,
}

impl ChangeLog {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a change, collapsing into an existing unsynced change for the
    /// same entity when one is present. Returns the change as stored.
    pub fn record(&self, change: Change) -> Result<Change> {
        let existing = self.unsynced_for(change.entity_type.as_str(), &change.entity_id)?;

        match existing {
            None => {
                self.insert(&change)?;
                Ok(change)
            }
            Some(prior) => {
                let collapsed = collapse(prior, change)?;
                self.rewrite(&collapsed)?;
                Ok(collapsed)
            }
        }
    }

    /// All unsynced changes in recording order.
    pub fn pending(&self) -> Result<Vec<Change>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_type, entity_id, operation, data, partial,
                        trip_id, user_id, timestamp, version, synced
                 FROM pending_changes WHERE synced = 0 ORDER BY seq ASC",
            )?;
            let changes = stmt
                .query_map([], parse_change)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            changes.into_iter().collect()
        })
    }

    /// Number of unsynced changes.
    pub fn pending_count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM pending_changes WHERE synced = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Mark a change as successfully pushed.
    pub fn mark_synced(&self, change_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE pending_changes SET synced = 1 WHERE id = ?1",
                params![change_id],
            )?;
            if rows == 0 {
                return Err(Error::NotFound("change", change_id.to_string()));
            }
            Ok(())
        })
    }

    fn unsynced_for(&self, entity_type: &str, entity_id: &str) -> Result<Option<Change>> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, entity_type, entity_id, operation, data, partial,
                        trip_id, user_id, timestamp, version, synced
                 FROM pending_changes
                 WHERE entity_type = ?1 AND entity_id = ?2 AND synced = 0",
                params![entity_type, entity_id],
                parse_change,
            );
            match result {
                Ok(change) => Ok(Some(change?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn insert(&self, change: &Change) -> Result<()> {
        let data = serde_json::to_string(&change.data)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_changes
                 (id, entity_type, entity_id, operation, data, partial,
                  trip_id, user_id, timestamp, version, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    change.id,
                    change.entity_type.as_str(),
                    change.entity_id,
                    change.operation.as_str(),
                    data,
                    i32::from(change.partial),
                    change.trip_id,
                    change.user_id,
                    change.timestamp.to_rfc3339(),
                    change.version,
                    i32::from(change.synced),
                ],
            )?;
            Ok(())
        })
    }

    fn rewrite(&self, change: &Change) -> Result<()> {
        let data = serde_json::to_string(&change.data)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_changes
                 SET operation = ?2, data = ?3, partial = ?4, timestamp = ?5, version = ?6
                 WHERE id = ?1 AND synced = 0",
                params![
                    change.id,
                    change.operation.as_str(),
                    data,
                    i32::from(change.partial),
                    change.timestamp.to_rfc3339(),
                    change.version,
                ],
            )?;
            Ok(())
        })
    }
}

fn parse_change(row: &Row<'_>) -> rusqlite::Result<Result<Change>> {
    let entity_type: String = row.get(1)?;
    let operation: String = row.get(3)?;
    let data: String = row.get(4)?;
    let timestamp: String = row.get(8)?;

    Ok(build_change(
        row.get(0)?,
        &entity_type,
        row.get(2)?,
        &operation,
        &data,
        row.get::<_, i32>(5)? != 0,
        row.get(6)?,
        row.get(7)?,
        &timestamp,
        row.get(9)?,
        row.get::<_, i32>(10)? != 0,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_change(
    id: String,
    entity_type: &str,
    entity_id: String,
    operation: &str,
    data: &str,
    partial: bool,
    trip_id: Option<String>,
    user_id: String,
    timestamp: &str,
    version: i64,
    synced: bool,
) -> Result<Change> {
    Ok(Change {
        id,
        entity_type: entity_type.parse()?,
        entity_id,
        operation: operation.parse()?,
        data: serde_json::from_str(data)?,
        partial,
        trip_id,
        user_id,
        timestamp: timestamp
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::InvalidInput(format!("bad change timestamp: {e}")))?,
        version,
        synced,
    })
}

/// Collapse a newly recorded change into the prior unsynced change for the
/// same entity. The prior change's id and queue position are kept.
fn collapse(prior: Change, new: Change) -> Result<Change> {
    use ChangeOperation::{Create, Delete, Update};

    let mut collapsed = prior;
    collapsed.timestamp = new.timestamp;
    collapsed.version = new.version;

    match (collapsed.operation, new.operation) {
        // A delete supersedes whatever came before it.
        (_, Delete) => {
            collapsed.operation = Delete;
            collapsed.data = new.data;
            collapsed.partial = false;
        }
        // Edits folded into a not-yet-pushed create stay a create.
        (Create, Update) => {
            if new.partial {
                collapsed.data = merge_patch(collapsed.data, &new.data)?;
            } else {
                collapsed.data = new.data;
            }
        }
        // Recreating an entity with a pending delete: the remote row exists
        // as a tombstone, so push it as a reviving update.
        (Delete, Create | Update) => {
            collapsed.operation = Update;
            collapsed.data = new.data;
            collapsed.partial = new.partial;
        }
        (Update, Update | Create) => match (collapsed.partial, new.partial) {
            // Patches accumulate; a full snapshot wins outright.
            (true, true) => collapsed.data = merge_patch(collapsed.data, &new.data)?,
            (false, true) => collapsed.data = merge_patch(collapsed.data, &new.data)?,
            (_, false) => {
                collapsed.data = new.data;
                collapsed.partial = false;
            }
        },
        (Create, Create) => {
            // Double-create for one id cannot happen through the tracker;
            // treat the later snapshot as authoritative.
            collapsed.data = new.data;
        }
    }

    Ok(collapsed)
}

/// Merge top-level keys of `patch` onto `base`.
fn merge_patch(base: Value, patch: &Value) -> Result<Value> {
    let (Value::Object(mut base_map), Value::Object(patch_map)) = (base, patch) else {
        return Err(Error::InvalidInput(
            "change payloads must be JSON objects".to_string(),
        ));
    };
    for (key, value) in patch_map {
        base_map.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(base_map))
}
