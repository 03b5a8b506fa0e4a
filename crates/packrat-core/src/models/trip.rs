//! Trip model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{impl_syncable_fields, EntityType, Syncable};
use crate::util::utc_now;

/// One day of a trip, with its location and day-specific packing items.
///
/// Stored as part of the trip's `days` JSON column rather than as rows of
/// their own, so field-level conflict paths look like `days.0.items.1.packed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDay {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub expected_weather: Option<String>,
    #[serde(default)]
    pub items: Vec<DayItem>,
}

/// A packing item pinned to a specific day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayItem {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub packed: bool,
}

const fn default_quantity() -> u32 {
    1
}

/// Per-trip preferences, round-tripped as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSettings {
    #[serde(default)]
    pub default_quantity_per_day: Option<u32>,
    #[serde(default)]
    pub shared_packing: bool,
}

/// A trip: the root entity every person, item, and trip rule is scoped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub days: Vec<TripDay>,
    #[serde(default)]
    pub settings: TripSettings,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Trip {
    /// Create a new trip owned by `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            days: Vec::new(),
            settings: TripSettings::default(),
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for Trip {
    const ENTITY_TYPE: EntityType = EntityType::Trip;

    fn scope_id(&self) -> &str {
        &self.user_id
    }

    fn trip_scope(&self) -> Option<&str> {
        Some(&self.id)
    }

    impl_syncable_fields!();
}
