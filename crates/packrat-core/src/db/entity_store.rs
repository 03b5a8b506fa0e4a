//! Generic per-entity-type persistence adapter.

use std::marker::PhantomData;

use rusqlite::params;

use crate::error::{Error, Result};
use crate::models::Syncable;
use crate::util::utc_now;

use super::Database;

/// SQLite store for one entity type.
///
/// All six tracked types share the same row shape: promoted `scope_id`,
/// `version`, `updated_at`, `is_deleted` columns for filtering, and the
/// full entity as a JSON `data` column. Rows are soft-deleted only;
/// tombstones stay readable through [`get`](Self::get) because the pull
/// pipeline needs them to detect conflicts against deleted entities.
pub struct EntityStore<T: Syncable> {
    db: Database,
    _marker: PhantomData<T>,
}

impl<T: Syncable> EntityStore<T> {
    /// Create a store bound to `T`'s table.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    /// Fetch an entity by id, including soft-deleted tombstones.
    pub fn get(&self, id: &str) -> Result<Option<T>> {
        let table = T::ENTITY_TYPE.table();
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT data FROM {table} WHERE id = ?1"),
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

    /// Insert or replace an entity.
    pub fn save(&self, entity: &T) -> Result<()> {
        let table = T::ENTITY_TYPE.table();
        let data = serde_json::to_string(entity)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table}
                     (id, scope_id, version, updated_at, is_deleted, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    entity.id(),
                    entity.scope_id(),
                    entity.version(),
                    entity.updated_at().to_rfc3339(),
                    i32::from(entity.is_deleted()),
                    data
                ],
            )?;
            Ok(())
        })
    }

    /// Soft-delete an entity: flag the row and its JSON payload, bump
    /// `updated_at`. The row itself is never removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut entity = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(T::ENTITY_TYPE.as_str(), id.to_string()))?;
        entity.set_deleted(true);
        entity.set_updated_at(utc_now());
        self.save(&entity)
    }

    /// List live entities in a scope, most recently updated first.
    pub fn list(&self, scope_id: &str) -> Result<Vec<T>> {
        let table = T::ENTITY_TYPE.table();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT data FROM {table}
                 WHERE scope_id = ?1 AND is_deleted = 0
                 ORDER BY updated_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![scope_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.iter()
                .map(|data| Ok(serde_json::from_str(data)?))
                .collect()
        })
    }

    /// Ids of all rows in a scope, tombstones included. Used by the pull
    /// pipeline to assemble the trip-id scope for child entities.
    pub fn ids_in_scope(&self, scope_id: &str) -> Result<Vec<String>> {
        let table = T::ENTITY_TYPE.table();
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT id FROM {table} WHERE scope_id = ?1"))?;
            let ids = stmt
                .query_map(params![scope_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Syncable, Trip, TripItem};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn save_and_get_round_trip() {
        let db = setup();
        let store = EntityStore::<Trip>::new(db);

        let trip = Trip::new("u1", "Alps");
        store.save(&trip).unwrap();

        let fetched = store.get(&trip.id).unwrap().unwrap();
        assert_eq!(fetched, trip);
    }

    #[test]
    fn get_missing_returns_none() {
        let db = setup();
        let store = EntityStore::<Trip>::new(db);
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn delete_is_soft_and_still_gettable() {
        let db = setup();
        let store = EntityStore::<TripItem>::new(db);

        let item = TripItem::new("t1", "Socks");
        store.save(&item).unwrap();
        store.delete(&item.id).unwrap();

        let tombstone = store.get(&item.id).unwrap().unwrap();
        assert!(tombstone.is_deleted);
        assert!(tombstone.updated_at >= item.updated_at);

        // Gone from the live list
        assert!(store.list("t1").unwrap().is_empty());
    }

    #[test]
    fn list_is_scoped() {
        let db = setup();
        let store = EntityStore::<TripItem>::new(db.clone());

        store.save(&TripItem::new("t1", "Socks")).unwrap();
        store.save(&TripItem::new("t1", "Boots")).unwrap();
        store.save(&TripItem::new("t2", "Sunscreen")).unwrap();

        assert_eq!(store.list("t1").unwrap().len(), 2);
        assert_eq!(store.list("t2").unwrap().len(), 1);
        assert_eq!(store.ids_in_scope("t1").unwrap().len(), 2);
    }

    #[test]
    fn save_replaces_existing_row() {
        let db = setup();
        let store = EntityStore::<Trip>::new(db);

        let mut trip = Trip::new("u1", "Alps");
        store.save(&trip).unwrap();

        trip.title = "Dolomites".to_string();
        trip.set_version(2);
        store.save(&trip).unwrap();

        let fetched = store.get(&trip.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Dolomites");
        assert_eq!(fetched.version, 2);
    }
}
