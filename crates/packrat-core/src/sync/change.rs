//! Change records: durable intents describing one committed local mutation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::models::EntityType;
use crate::util::utc_now;

/// The kind of local mutation a [`Change`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// A durable record of one local mutation pending (or already) push to the
/// remote store.
///
/// Appended by the change tracker the instant a mutation commits locally and
/// consumed by the push pipeline, which marks it `synced` on successful
/// remote application. `data` is a full entity snapshot, or a minimal patch
/// (`partial == true`) for the optimized packed-status path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub data: Value,
    #[serde(default)]
    pub partial: bool,
    /// Trip ownership key used for remote authorization checks; `None` for
    /// user-scoped entities.
    pub trip_id: Option<String>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Entity version at the time this change was recorded.
    pub version: i64,
    #[serde(default)]
    pub synced: bool,
}

impl Change {
    /// Build a new unsynced change stamped with the current time.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
        data: Value,
        trip_id: Option<String>,
        user_id: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            data,
            partial: false,
            trip_id,
            user_id: user_id.into(),
            timestamp: utc_now(),
            version,
            synced: false,
        }
    }

    /// Mark this change as carrying a minimal partial payload.
    #[must_use]
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_round_trips_through_str() {
        for op in [
            ChangeOperation::Create,
            ChangeOperation::Update,
            ChangeOperation::Delete,
        ] {
            let parsed: ChangeOperation = op.as_str().parse().unwrap();
            assert_eq!(op, parsed);
        }
    }

    #[test]
    fn new_change_is_unsynced_and_full() {
        let change = Change::new(
            EntityType::Item,
            "i1",
            ChangeOperation::Update,
            json!({"id": "i1"}),
            Some("t1".to_string()),
            "u1",
            2,
        );
        assert!(!change.synced);
        assert!(!change.partial);
        assert_eq!(change.version, 2);

        let partial = change.partial();
        assert!(partial.partial);
    }
}
