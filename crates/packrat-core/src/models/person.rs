//! Person model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{impl_syncable_fields, EntityType, Syncable};
use crate::util::utc_now;

/// A traveller on a trip. Items can be assigned to a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Person {
    /// Create a new person on the given trip.
    #[must_use]
    pub fn new(trip_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            trip_id: trip_id.into(),
            name: name.into(),
            age: None,
            gender: None,
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for Person {
    const ENTITY_TYPE: EntityType = EntityType::Person;

    fn scope_id(&self) -> &str {
        &self.trip_id
    }

    fn trip_scope(&self) -> Option<&str> {
        Some(&self.trip_id)
    }

    impl_syncable_fields!();
}
