//! Pull pipeline: ingest remote rows changed since the watermark.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::{ConflictStore, Database, EntityStore};
use crate::error::{Error, Result};
use crate::models::{DefaultItemRule, EntityType, Person, Syncable, Trip, TripItem, TripRule};
use crate::remote::{rows, RemoteStore, RowFilter};

use super::conflict::SyncConflict;

/// An entity applied locally during a pull, ready for an upsert
/// notification to the UI layer.
#[derive(Debug, Clone)]
pub struct AppliedUpsert {
    pub entity_type: EntityType,
    pub entity: Value,
}

/// What one full pull produced. Pull is not globally transactional: each
/// entity type pulls independently, so applied entities, staged conflicts,
/// and per-type failures can all be present at once.
#[derive(Debug, Default)]
pub struct PullOutcome {
    pub applied: Vec<AppliedUpsert>,
    pub conflicts: Vec<SyncConflict>,
    pub failures: Vec<(EntityType, Error)>,
    /// Max server `updated_at` seen across all types; only safe to record
    /// as the new watermark when `failures` is empty.
    pub watermark: Option<DateTime<Utc>>,
}

impl PullOutcome {
    fn absorb(&mut self, entity_type: EntityType, result: Result<TypePull>) {
        match result {
            Ok(pull) => {
                self.applied.extend(pull.applied);
                self.conflicts.extend(pull.conflicts);
                if let Some(at) = pull.max_updated_at {
                    self.watermark = Some(self.watermark.map_or(at, |w| w.max(at)));
                }
            }
            Err(error) => {
                tracing::warn!(%entity_type, %error, "pull failed for entity type");
                self.failures.push((entity_type, error));
            }
        }
    }
}

#[derive(Debug, Default)]
struct TypePull {
    applied: Vec<AppliedUpsert>,
    conflicts: Vec<SyncConflict>,
    max_updated_at: Option<DateTime<Utc>>,
}

/// Fetches remote rows changed since a watermark and either fast-applies
/// them or stages conflicts.
pub struct PullPipeline {
    db: Database,
}

impl PullPipeline {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Pull every remote entity type for `user_id`.
    ///
    /// Trips come first since they define the id scope; the trip-scoped
    /// types then pull concurrently against the trip ids known after the
    /// trip pull. Rule packs are local-only and never pulled.
    pub async fn pull_all<R: RemoteStore>(
        &self,
        remote: &R,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> PullOutcome {
        let mut outcome = PullOutcome::default();

        let trip_filter = RowFilter::user(user_id);
        outcome.absorb(
            EntityType::Trip,
            self.pull_type::<Trip, R>(remote, &trip_filter, since).await,
        );

        // Scope children to every trip we now know about, tombstones
        // included, so their child rows can still sync.
        let trip_ids = match EntityStore::<Trip>::new(self.db.clone()).ids_in_scope(user_id) {
            Ok(ids) => ids,
            Err(error) => {
                outcome.failures.push((EntityType::Trip, error));
                return outcome;
            }
        };

        let rule_filter = RowFilter::user(user_id);
        if trip_ids.is_empty() {
            outcome.absorb(
                EntityType::DefaultItemRule,
                self.pull_type::<DefaultItemRule, R>(remote, &rule_filter, since)
                    .await,
            );
            return outcome;
        }

        let child_filter = RowFilter::trips(trip_ids);
        let (people, items, rules, trip_rules) = tokio::join!(
            self.pull_type::<Person, R>(remote, &child_filter, since),
            self.pull_type::<TripItem, R>(remote, &child_filter, since),
            self.pull_type::<DefaultItemRule, R>(remote, &rule_filter, since),
            self.pull_type::<TripRule, R>(remote, &child_filter, since),
        );
        outcome.absorb(EntityType::Person, people);
        outcome.absorb(EntityType::Item, items);
        outcome.absorb(EntityType::DefaultItemRule, rules);
        outcome.absorb(EntityType::TripRule, trip_rules);

        outcome
    }

    /// Pull one entity type. A network or store failure aborts this type's
    /// pull; already-applied rows are not rolled back.
    async fn pull_type<T: Syncable, R: RemoteStore>(
        &self,
        remote: &R,
        filter: &RowFilter,
        since: Option<DateTime<Utc>>,
    ) -> Result<TypePull> {
        let Some(table) = T::ENTITY_TYPE.remote_table() else {
            return Ok(TypePull::default());
        };

        let remote_rows = remote.select_since(table, filter, since).await?;
        let store = EntityStore::<T>::new(self.db.clone());
        let mut pull = TypePull::default();

        // Rows arrive ordered by updated_at ascending, so non-conflicting
        // later server writes land after earlier ones.
        for row in remote_rows {
            let row_at = rows::row_updated_at(&row)?;
            pull.max_updated_at = Some(pull.max_updated_at.map_or(row_at, |m| m.max(row_at)));

            let incoming: T = rows::row_to_entity(row)?;
            match store.get(incoming.id())? {
                None => {
                    store.save(&incoming)?;
                    pull.applied.push(AppliedUpsert {
                        entity_type: T::ENTITY_TYPE,
                        entity: serde_json::to_value(&incoming)?,
                    });
                }
                Some(local) if local.updated_at() == incoming.updated_at() => {
                    // Already consistent
                }
                Some(local) => {
                    let conflict_store = ConflictStore::new(self.db.clone());
                    if conflict_store.was_resolved(
                        T::ENTITY_TYPE,
                        incoming.id(),
                        incoming.updated_at(),
                    )? {
                        // A resolution already settled this exact server
                        // state; the local outcome wins and pushes out.
                        continue;
                    }
                    tracing::debug!(
                        entity_type = %T::ENTITY_TYPE,
                        entity_id = incoming.id(),
                        "divergent updated_at, staging conflict"
                    );
                    let conflict = SyncConflict::detect(
                        T::ENTITY_TYPE,
                        incoming.id(),
                        serde_json::to_value(&local)?,
                        serde_json::to_value(&incoming)?,
                    );
                    conflict_store.stage(&conflict)?;
                    pull.conflicts.push(conflict);
                }
            }
        }

        Ok(pull)
    }
}
