//! Entity type registry and the `Syncable` seam shared by every tracked entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The kinds of entities the sync engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Trip,
    Person,
    Item,
    DefaultItemRule,
    TripRule,
    RulePack,
}

impl EntityType {
    /// Stable string name used in change records and conflict records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trip => "trip",
            Self::Person => "person",
            Self::Item => "item",
            Self::DefaultItemRule => "default_item_rule",
            Self::TripRule => "trip_rule",
            Self::RulePack => "rule_pack",
        }
    }

    /// Local SQLite table holding this entity type.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Trip => "trips",
            Self::Person => "people",
            Self::Item => "trip_items",
            Self::DefaultItemRule => "default_item_rules",
            Self::TripRule => "trip_rules",
            Self::RulePack => "rule_packs",
        }
    }

    /// Remote table name. Rule packs are local-only and have no remote table.
    #[must_use]
    pub const fn remote_table(self) -> Option<&'static str> {
        match self {
            Self::RulePack => None,
            other => Some(other.table()),
        }
    }

    /// Whether rows of this type are synced to the remote store.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        self.remote_table().is_some()
    }

    /// Entity types whose rows are scoped to a trip rather than a user.
    #[must_use]
    pub const fn is_trip_scoped(self) -> bool {
        matches!(self, Self::Person | Self::Item | Self::TripRule)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trip" => Ok(Self::Trip),
            "person" => Ok(Self::Person),
            "item" => Ok(Self::Item),
            "default_item_rule" => Ok(Self::DefaultItemRule),
            "trip_rule" => Ok(Self::TripRule),
            "rule_pack" => Ok(Self::RulePack),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}

/// Contract every tracked entity satisfies so the stores, pipelines, and
/// resolver can handle all six types generically.
///
/// Invariants carried by implementors: `(ENTITY_TYPE, id)` uniquely
/// identifies a record, and `version` strictly increases with every
/// accepted write, local or remote.
pub trait Syncable: Serialize + DeserializeOwned + Clone {
    const ENTITY_TYPE: EntityType;

    fn id(&self) -> &str;

    /// Scope key for `list`: owning user id for user-scoped entities,
    /// trip id for trip-scoped ones.
    fn scope_id(&self) -> &str;

    /// Trip ownership key for change records; `None` for entities that
    /// belong to a user rather than a trip.
    fn trip_scope(&self) -> Option<&str>;

    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    fn is_deleted(&self) -> bool;
    fn set_deleted(&mut self, deleted: bool);
}

/// Implements the field-accessor portion of [`Syncable`] for an entity
/// struct with the standard `id`/`version`/timestamps/`is_deleted` fields.
macro_rules! impl_syncable_fields {
    () => {
        fn id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
            self.created_at
        }

        fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
            self.updated_at
        }

        fn set_updated_at(&mut self, at: chrono::DateTime<chrono::Utc>) {
            self.updated_at = at;
        }

        fn is_deleted(&self) -> bool {
            self.is_deleted
        }

        fn set_deleted(&mut self, deleted: bool) {
            self.is_deleted = deleted;
        }
    };
}

pub(crate) use impl_syncable_fields;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for ty in [
            EntityType::Trip,
            EntityType::Person,
            EntityType::Item,
            EntityType::DefaultItemRule,
            EntityType::TripRule,
            EntityType::RulePack,
        ] {
            let parsed: EntityType = ty.as_str().parse().unwrap();
            assert_eq!(ty, parsed);
        }
    }

    #[test]
    fn rule_packs_are_local_only() {
        assert!(!EntityType::RulePack.is_remote());
        assert!(EntityType::Trip.is_remote());
        assert_eq!(EntityType::RulePack.remote_table(), None);
    }

    #[test]
    fn unknown_entity_type_is_rejected() {
        assert!("suitcase".parse::<EntityType>().is_err());
    }
}
