//! Remote store abstraction: a row-versioned table service reachable only
//! when online.

mod http;
pub mod rows;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

pub use http::{PostgrestRemoteStore, RemoteConfig};

/// Row scope for a select: by owning user, by trip membership, or both.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub user_id: Option<String>,
    pub trip_ids: Option<Vec<String>>,
}

impl RowFilter {
    /// Rows owned by a user.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            trip_ids: None,
        }
    }

    /// Rows belonging to any of the given trips.
    #[must_use]
    pub fn trips(trip_ids: Vec<String>) -> Self {
        Self {
            user_id: None,
            trip_ids: Some(trip_ids),
        }
    }
}

/// Row-oriented table API keyed by the same ids as local entities.
///
/// Rows are raw snake_case JSON objects; translation to domain entities
/// happens in [`rows`]. Implementations must return `select_since` results
/// ordered by `updated_at` ascending.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Rows matching `filter` with `updated_at` strictly after `since`,
    /// ordered by `updated_at` ascending.
    async fn select_since(
        &self,
        table: &str,
        filter: &RowFilter,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>>;

    /// Insert or replace a full row keyed by its `id` column.
    async fn upsert(&self, table: &str, row: Value) -> Result<()>;

    /// Patch a subset of columns on an existing row.
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<()>;

    /// Cheap reachability check. Must resolve quickly; callers bound it
    /// with a timeout.
    async fn probe(&self) -> bool;
}

/// In-memory [`RemoteStore`].
///
/// Used as the remote double in tests and as the backing store when the app
/// runs without a configured remote. Supports failure injection so sync
/// error paths can be exercised deterministically.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    tables: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
    failing_tables: Arc<Mutex<HashSet<String>>>,
    offline: Arc<Mutex<bool>>,
    reject_writes: Arc<Mutex<bool>>,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `table` fail with a remote error.
    pub fn fail_table(&self, table: &str, failing: bool) {
        let mut set = lock(&self.failing_tables);
        if failing {
            set.insert(table.to_string());
        } else {
            set.remove(table);
        }
    }

    /// Simulate loss of connectivity: probe returns false, operations error.
    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    /// Simulate a row-policy rejection on every write.
    pub fn set_reject_writes(&self, reject: bool) {
        *lock(&self.reject_writes) = reject;
    }

    /// Snapshot of a row as currently stored, for assertions.
    #[must_use]
    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        lock(&self.tables).get(table)?.get(id).cloned()
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn check_available(&self, table: &str) -> Result<()> {
        if *lock(&self.offline) {
            return Err(Error::Remote("remote unreachable".to_string()));
        }
        if lock(&self.failing_tables).contains(table) {
            return Err(Error::Remote(format!("injected failure for {table}")));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteStore for MemoryRemote {
    async fn select_since(
        &self,
        table: &str,
        filter: &RowFilter,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        self.check_available(table)?;

        let tables = lock(&self.tables);
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Value> = rows
            .values()
            .filter(|row| {
                if let Some(user_id) = &filter.user_id {
                    if row.get("user_id").and_then(Value::as_str) != Some(user_id) {
                        return false;
                    }
                }
                if let Some(trip_ids) = &filter.trip_ids {
                    let Some(trip_id) = row.get("trip_id").and_then(Value::as_str) else {
                        return false;
                    };
                    if !trip_ids.iter().any(|id| id == trip_id) {
                        return false;
                    }
                }
                if let Some(since) = since {
                    match rows::row_updated_at(row) {
                        Ok(at) => at > since,
                        Err(_) => false,
                    }
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        matched.sort_by_key(|row| rows::row_updated_at(row).ok());
        Ok(matched)
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<()> {
        self.check_available(table)?;
        if *lock(&self.reject_writes) {
            return Err(Error::PolicyRejection("row policy denied write".to_string()));
        }

        let id = rows::row_id(&row)?.to_string();
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<()> {
        self.check_available(table)?;
        if *lock(&self.reject_writes) {
            return Err(Error::PolicyRejection("row policy denied write".to_string()));
        }

        let Value::Object(patch_map) = patch else {
            return Err(Error::InvalidInput("patch must be an object".to_string()));
        };

        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        match rows.get_mut(id) {
            Some(Value::Object(existing)) => {
                for (key, value) in patch_map {
                    existing.insert(key, value);
                }
                Ok(())
            }
            Some(_) => Err(Error::Remote(format!("malformed row {table}/{id}"))),
            None => {
                // Patch for a row the server has never seen (e.g. an offline
                // create collapsed into a delete). Store the patch as the
                // row so the tombstone exists.
                let mut map = serde_json::Map::from_iter(patch_map);
                map.entry("id".to_string())
                    .or_insert_with(|| Value::String(id.to_string()));
                rows.insert(id.to_string(), Value::Object(map));
                Ok(())
            }
        }
    }

    async fn probe(&self) -> bool {
        !*lock(&self.offline)
    }
}
