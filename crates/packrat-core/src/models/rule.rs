//! Packing rule models: default item rules, trip-rule associations, rule packs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::entity::{impl_syncable_fields, EntityType, Syncable};
use crate::util::utc_now;

/// A reusable packing rule owned by a user ("N socks per day", "umbrella
/// when rain expected"). `conditions` and `calculation` are free-form JSON
/// round-tripped through the remote store's Json columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultItemRule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Value>,
    #[serde(default)]
    pub calculation: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl DefaultItemRule {
    /// Create a new rule owned by `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            category_id: None,
            conditions: Vec::new(),
            calculation: Value::Null,
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for DefaultItemRule {
    const ENTITY_TYPE: EntityType = EntityType::DefaultItemRule;

    fn scope_id(&self) -> &str {
        &self.user_id
    }

    fn trip_scope(&self) -> Option<&str> {
        None
    }

    impl_syncable_fields!();
}

/// Association row activating a rule on one trip, with optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRule {
    pub id: String,
    pub trip_id: String,
    pub rule_id: String,
    #[serde(default)]
    pub overrides: Option<Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl TripRule {
    /// Activate `rule_id` on `trip_id`.
    #[must_use]
    pub fn new(trip_id: impl Into<String>, rule_id: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            trip_id: trip_id.into(),
            rule_id: rule_id.into(),
            overrides: None,
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for TripRule {
    const ENTITY_TYPE: EntityType = EntityType::TripRule;

    fn scope_id(&self) -> &str {
        &self.trip_id
    }

    fn trip_scope(&self) -> Option<&str> {
        Some(&self.trip_id)
    }

    impl_syncable_fields!();
}

/// A bundled set of rules shipped with the app or assembled by the user.
/// Local-only: rule packs never leave the device (no remote table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePack {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Rule definitions carried by the pack, instantiated into
    /// `DefaultItemRule`s when the pack is applied.
    #[serde(default)]
    pub rules: Vec<Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl RulePack {
    /// Create a new empty rule pack for `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = utc_now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            rules: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }
}

impl Syncable for RulePack {
    const ENTITY_TYPE: EntityType = EntityType::RulePack;

    fn scope_id(&self) -> &str {
        &self.user_id
    }

    fn trip_scope(&self) -> Option<&str> {
        None
    }

    impl_syncable_fields!();
}
