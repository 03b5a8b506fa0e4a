//! Change tracker: records every committed local mutation as a durable
//! change and keeps the entity store in step.

use serde_json::json;

use crate::db::{ChangeLog, Database, EntityStore};
use crate::error::{Error, Result};
use crate::models::{EntityType, Syncable, TripItem};
use crate::util::utc_now;

use super::change::{Change, ChangeOperation};

/// Tracks local mutations.
///
/// Must be called exactly once per committed mutation of a tracked entity.
/// Persistence failure is fatal to the mutation and propagates to the
/// caller: a silently lost change record means permanent divergence. No
/// network I/O happens here.
#[derive(Clone)]
pub struct ChangeTracker {
    db: Database,
}

impl ChangeTracker {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a mutation of `after`, stamping its version and `updated_at`,
    /// persisting it, and appending a change to the pending log.
    ///
    /// `before` is the previously committed state (`None` for creates); the
    /// new version is `before.version + 1`.
    pub fn track<T: Syncable>(
        &self,
        operation: ChangeOperation,
        before: Option<&T>,
        after: &mut T,
        user_id: &str,
    ) -> Result<Change> {
        let version = before.map_or_else(|| after.version().max(1), |b| b.version() + 1);
        after.set_version(version);
        after.set_updated_at(utc_now());
        if operation == ChangeOperation::Delete {
            after.set_deleted(true);
        }
        self.track_prepared(operation, after, user_id)
    }

    /// Record an entity that already carries its final version and
    /// timestamps (the conflict resolver's path).
    pub fn track_prepared<T: Syncable>(
        &self,
        operation: ChangeOperation,
        entity: &T,
        user_id: &str,
    ) -> Result<Change> {
        EntityStore::<T>::new(self.db.clone()).save(entity)?;

        let change = Change::new(
            T::ENTITY_TYPE,
            entity.id(),
            operation,
            serde_json::to_value(entity)?,
            entity.trip_scope().map(ToString::to_string),
            user_id,
            entity.version(),
        );
        let change = ChangeLog::new(self.db.clone()).record(change)?;

        tracing::debug!(
            entity_type = %T::ENTITY_TYPE,
            entity_id = entity.id(),
            operation = %change.operation,
            version = change.version,
            "tracked local change"
        );
        Ok(change)
    }

    /// Optimized path for the packing-checked toggle: emits a minimal
    /// change carrying only `{id, packed, updatedAt}` so pushes stay small
    /// and concurrent edits to other fields are not clobbered.
    pub fn track_packed_status(
        &self,
        item_id: &str,
        packed: bool,
        user_id: &str,
    ) -> Result<Change> {
        let store = EntityStore::<TripItem>::new(self.db.clone());
        let mut item = store
            .get(item_id)?
            .ok_or_else(|| Error::NotFound("item", item_id.to_string()))?;

        item.packed = packed;
        item.version += 1;
        item.set_updated_at(utc_now());
        store.save(&item)?;

        let change = Change::new(
            EntityType::Item,
            item_id,
            ChangeOperation::Update,
            json!({
                "id": item.id,
                "packed": item.packed,
                "updatedAt": item.updated_at,
            }),
            Some(item.trip_id.clone()),
            user_id,
            item.version,
        )
        .partial();
        let change = ChangeLog::new(self.db.clone()).record(change)?;

        tracing::debug!(item_id, packed, "tracked packed-status toggle");
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Person;
    use pretty_assertions::assert_eq;

    fn setup() -> (ChangeTracker, Database) {
        let db = Database::open_in_memory().unwrap();
        (ChangeTracker::new(db.clone()), db)
    }

    #[test]
    fn track_create_persists_entity_and_change() {
        let (tracker, db) = setup();
        let mut person = Person::new("t1", "Ada");

        let change = tracker
            .track(ChangeOperation::Create, None, &mut person, "u1")
            .unwrap();
        assert_eq!(change.operation, ChangeOperation::Create);
        assert_eq!(change.version, 1);
        assert_eq!(change.trip_id.as_deref(), Some("t1"));

        let stored = EntityStore::<Person>::new(db.clone())
            .get(&person.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored, person);
        assert_eq!(ChangeLog::new(db).pending_count().unwrap(), 1);
    }

    #[test]
    fn track_update_bumps_version() {
        let (tracker, _db) = setup();
        let mut person = Person::new("t1", "Ada");
        tracker
            .track(ChangeOperation::Create, None, &mut person, "u1")
            .unwrap();

        let before = person.clone();
        person.name = "Grace".to_string();
        let change = tracker
            .track(ChangeOperation::Update, Some(&before), &mut person, "u1")
            .unwrap();

        assert_eq!(person.version, 2);
        assert_eq!(change.version, 2);
        assert!(person.updated_at >= before.updated_at);
    }

    #[test]
    fn track_delete_soft_deletes() {
        let (tracker, db) = setup();
        let mut person = Person::new("t1", "Ada");
        tracker
            .track(ChangeOperation::Create, None, &mut person, "u1")
            .unwrap();

        let before = person.clone();
        tracker
            .track(ChangeOperation::Delete, Some(&before), &mut person, "u1")
            .unwrap();

        let stored = EntityStore::<Person>::new(db)
            .get(&person.id)
            .unwrap()
            .unwrap();
        assert!(stored.is_deleted);
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn packed_toggle_emits_minimal_partial_change() {
        let (tracker, db) = setup();
        // An already-synced item (no pending change for it)
        let item = TripItem::new("t1", "Socks");
        EntityStore::<TripItem>::new(db.clone()).save(&item).unwrap();

        let change = tracker.track_packed_status(&item.id, true, "u1").unwrap();
        assert!(change.partial);
        assert_eq!(change.operation, ChangeOperation::Update);

        let data = change.data.as_object().unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.contains_key("packed"));
        assert!(data.contains_key("updatedAt"));

        let stored = EntityStore::<TripItem>::new(db).get(&item.id).unwrap().unwrap();
        assert!(stored.packed);
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn packed_toggle_folds_into_pending_create() {
        let (tracker, db) = setup();
        let mut item = TripItem::new("t1", "Socks");
        tracker
            .track(ChangeOperation::Create, None, &mut item, "u1")
            .unwrap();

        let change = tracker.track_packed_status(&item.id, true, "u1").unwrap();
        // Collapsed into the not-yet-pushed create: one pending change
        // carrying the full snapshot with the new packed value.
        assert_eq!(change.operation, ChangeOperation::Create);
        assert!(!change.partial);
        assert_eq!(change.data["packed"], true);
        assert_eq!(ChangeLog::new(db).pending_count().unwrap(), 1);
    }

    #[test]
    fn packed_toggle_on_missing_item_fails() {
        let (tracker, _db) = setup();
        assert!(tracker.track_packed_status("missing", true, "u1").is_err());
    }
}
