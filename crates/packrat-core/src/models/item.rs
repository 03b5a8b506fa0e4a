//! Trip item model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{impl_syncable_fields, EntityType, Syncable};
use crate::util::utc_now;

/// A packing-list item on a trip.
///
/// `packed` is the highest-churn field in the app; the change tracker has a
/// dedicated minimal-payload path for toggling it (see
/// [`crate::sync::ChangeTracker::track_packed_status`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripItem {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub packed: bool,
    /// Person this item belongs to, if assigned.
    #[serde(default)]
    pub person_id: Option<String>,
    /// Day of the trip this item is pinned to, if any.
    #[serde(default)]
    pub day_index: Option<u32>,
    /// Rule that generated this item, if it was not added by hand.
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

const fn default_quantity() -> u32 {
    1
}

impl TripItem {
    /// Create a new unpacked item on the given trip.
    #[must_use]
    pub fn new(trip_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            trip_id: trip_id.into(),
            name: name.into(),
            quantity: 1,
            packed: false,
            person_id: None,
            day_index: None,
            rule_id: None,
            notes: None,
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for TripItem {
    const ENTITY_TYPE: EntityType = EntityType::Item;

    fn scope_id(&self) -> &str {
        &self.trip_id
    }

    fn trip_scope(&self) -> Option<&str> {
        Some(&self.trip_id)
    }

    impl_syncable_fields!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_defaults_to_one() {
        let json = serde_json::json!({
            "id": "i1",
            "tripId": "t1",
            "name": "Socks",
            "version": 1,
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z",
        });
        let item: TripItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.quantity, 1);
        assert!(!item.packed);
        assert_eq!(item.person_id, None);
    }
}
