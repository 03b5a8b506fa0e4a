//! Conflict resolution: turn a staged [`SyncConflict`] into a committed
//! local entity, and a pending change when the outcome diverges from the
//! server.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{DefaultItemRule, EntityType, Person, RulePack, Syncable, Trip, TripItem, TripRule};
use crate::util::utc_now;

use super::change::ChangeOperation;
use super::conflict::SyncConflict;
use super::diff::{get_path, remove_path, set_path, DiffKind};
use super::tracker::ChangeTracker;

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Keep the local snapshot, superseding the server's.
    Local,
    /// Accept the server snapshot exactly as received.
    Server,
    /// Field-by-field merge driven by per-path [`FieldChoice`] overrides.
    Manual,
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Which side a manually merged field takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChoice {
    Local,
    Server,
}

/// Timestamp fields the engine manages: never subject to a per-field
/// choice, always restamped on resolution.
const MANAGED_FIELDS: &[&str] = &[
    "updatedAt",
    "updated_at",
    "createdAt",
    "created_at",
    "timestamp",
];

/// Applies a resolution strategy to a staged conflict and commits the
/// winning snapshot to the local store.
pub struct ConflictResolver {
    db: Database,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve a conflict and return the committed entity snapshot.
    ///
    /// Accepting the server side persists its snapshot verbatim and leaves
    /// the change queue alone. Keeping local fields, wholly or per-field,
    /// produces a snapshot newer than both sides (version bumped past the
    /// maximum, `updatedAt` restamped) plus a pending update change so the
    /// outcome propagates on the next push.
    pub fn resolve(
        &self,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        overrides: &HashMap<String, FieldChoice>,
        user_id: &str,
    ) -> Result<Value> {
        let resolved = match strategy {
            ResolutionStrategy::Server => conflict.server_version.clone(),
            ResolutionStrategy::Local => {
                let mut value = conflict.local_version.clone();
                self.stamp_outcome(&mut value, conflict)?;
                value
            }
            ResolutionStrategy::Manual => {
                let mut value = self.merge_manual(conflict, overrides)?;
                self.stamp_outcome(&mut value, conflict)?;
                value
            }
        };

        let record_change = strategy != ResolutionStrategy::Server;
        self.commit(conflict.entity_type, resolved.clone(), record_change, user_id)?;
        tracing::info!(
            conflict_id = conflict.id,
            entity_type = %conflict.entity_type,
            entity_id = conflict.entity_id,
            ?strategy,
            "conflict resolved"
        );
        Ok(resolved)
    }

    /// Field-level merge: conflicting paths default to the server value,
    /// flipped back to local where an override says so. Engine-managed
    /// timestamps are never merged.
    fn merge_manual(
        &self,
        conflict: &SyncConflict,
        overrides: &HashMap<String, FieldChoice>,
    ) -> Result<Value> {
        let mut merged = conflict
            .conflict_details
            .as_ref()
            .map_or_else(|| conflict.local_version.clone(), |d| d.merged_object.clone());

        let diffs = conflict
            .conflict_details
            .as_ref()
            .map(|d| d.conflicts.as_slice())
            .unwrap_or_default();

        for diff in diffs {
            let leaf = diff.path.rsplit('.').next().unwrap_or(&diff.path);
            if MANAGED_FIELDS.contains(&leaf) {
                continue;
            }

            let choice = overrides
                .get(&diff.path)
                .copied()
                .unwrap_or(FieldChoice::Server);
            match choice {
                FieldChoice::Server => match diff.kind {
                    DiffKind::Removed => remove_path(&mut merged, &diff.path)?,
                    DiffKind::Modified | DiffKind::Added => {
                        set_path(&mut merged, &diff.path, diff.server_value.clone());
                    }
                },
                FieldChoice::Local => match diff.kind {
                    DiffKind::Added => remove_path(&mut merged, &diff.path)?,
                    DiffKind::Modified | DiffKind::Removed => {
                        set_path(&mut merged, &diff.path, diff.local_value.clone());
                    }
                },
            }
        }
        Ok(merged)
    }

    /// Make the outcome strictly newer than either input: version past the
    /// maximum, `updatedAt` past both timestamps, `createdAt` carried over.
    fn stamp_outcome(&self, value: &mut Value, conflict: &SyncConflict) -> Result<()> {
        let local_version = version_of(&conflict.local_version);
        let server_version = version_of(&conflict.server_version);
        set_path(value, "version", json!(local_version.max(server_version) + 1));

        // The wall clock alone is not enough: a server clock running ahead
        // would make the resolution look older than the state it replaces.
        let mut stamp = utc_now();
        let newest_input = updated_at_of(&conflict.local_version)
            .max(updated_at_of(&conflict.server_version));
        if let Some(at) = newest_input {
            if stamp <= at {
                stamp = at + chrono::Duration::milliseconds(1);
            }
        }
        set_path(value, "updatedAt", json!(stamp));

        let created_at = get_path(&conflict.local_version, "createdAt")
            .or_else(|| get_path(&conflict.server_version, "createdAt"))
            .cloned()
            .unwrap_or_else(|| json!(utc_now()));
        set_path(value, "createdAt", created_at);
        Ok(())
    }

    fn commit(
        &self,
        entity_type: EntityType,
        value: Value,
        record_change: bool,
        user_id: &str,
    ) -> Result<()> {
        match entity_type {
            EntityType::Trip => self.commit_typed::<Trip>(value, record_change, user_id),
            EntityType::Person => self.commit_typed::<Person>(value, record_change, user_id),
            EntityType::Item => self.commit_typed::<TripItem>(value, record_change, user_id),
            EntityType::DefaultItemRule => {
                self.commit_typed::<DefaultItemRule>(value, record_change, user_id)
            }
            EntityType::TripRule => self.commit_typed::<TripRule>(value, record_change, user_id),
            EntityType::RulePack => self.commit_typed::<RulePack>(value, record_change, user_id),
        }
    }

    fn commit_typed<T: Syncable>(
        &self,
        value: Value,
        record_change: bool,
        user_id: &str,
    ) -> Result<()> {
        let entity: T = serde_json::from_value(value)?;
        if record_change {
            ChangeTracker::new(self.db.clone()).track_prepared(
                ChangeOperation::Update,
                &entity,
                user_id,
            )?;
        } else {
            crate::db::EntityStore::<T>::new(self.db.clone()).save(&entity)?;
        }
        Ok(())
    }
}

fn version_of(value: &Value) -> i64 {
    value.get("version").and_then(Value::as_i64).unwrap_or(0)
}

fn updated_at_of(value: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|at| chrono::DateTime::parse_from_rfc3339(at).ok())
        .map(|at| at.with_timezone(&chrono::Utc))
}
