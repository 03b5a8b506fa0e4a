//! Sync conflict records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::EntityType;
use crate::util::utc_now;

use super::diff::{diff_values, merge_non_conflicting, FieldDiff};

/// The kind of divergence a conflict records. Update conflicts are the only
/// kind produced today; deletes are soft and flow through updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    UpdateConflict,
}

/// Field-level breakdown of a conflict: one diff per divergent leaf path
/// plus the pre-computed non-conflicting merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub conflicts: Vec<FieldDiff>,
    pub merged_object: Value,
}

/// A pair of divergent local/server versions of one entity awaiting
/// resolution.
///
/// A conflict exists only while unresolved: resolving it removes it from
/// the pending set, and it is never re-opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Local entity snapshot at detection time.
    pub local_version: Value,
    /// Server entity snapshot at detection time.
    pub server_version: Value,
    pub conflict_details: Option<ConflictDetails>,
    pub conflict_type: ConflictType,
    pub timestamp: DateTime<Utc>,
}

impl SyncConflict {
    /// Stage a conflict between divergent snapshots of the same entity,
    /// computing the field-level details up front.
    #[must_use]
    pub fn detect(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        local_version: Value,
        server_version: Value,
    ) -> Self {
        let conflicts = diff_values(&local_version, &server_version);
        let merged_object = merge_non_conflicting(&local_version, &conflicts);
        Self {
            id: Uuid::now_v7().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            local_version,
            server_version,
            conflict_details: Some(ConflictDetails {
                conflicts,
                merged_object,
            }),
            conflict_type: ConflictType::UpdateConflict,
            timestamp: utc_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::diff::DiffKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn detect_computes_field_level_details() {
        let local = json!({
            "id": "t1",
            "days": [{"items": [{"packed": false}]}],
            "updatedAt": "T1",
        });
        let server = json!({
            "id": "t1",
            "days": [{"items": [{"packed": true}]}],
            "updatedAt": "T2",
        });

        let conflict =
            SyncConflict::detect(EntityType::Trip, "t1", local.clone(), server.clone());
        assert_eq!(conflict.conflict_type, ConflictType::UpdateConflict);
        assert_eq!(conflict.local_version, local);
        assert_eq!(conflict.server_version, server);

        let details = conflict.conflict_details.unwrap();
        let packed = details
            .conflicts
            .iter()
            .find(|d| d.path == "days.0.items.0.packed")
            .unwrap();
        assert_eq!(packed.kind, DiffKind::Modified);
        assert_eq!(packed.local_value, json!(false));
        assert_eq!(packed.server_value, json!(true));

        // Merged object keeps local values at conflicting paths
        assert_eq!(details.merged_object["days"][0]["items"][0]["packed"], false);
    }

    #[test]
    fn conflict_serializes_wire_shape() {
        let conflict = SyncConflict::detect(
            EntityType::Item,
            "i1",
            json!({"id": "i1", "packed": false}),
            json!({"id": "i1", "packed": true}),
        );
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["conflictType"], "update_conflict");
        assert_eq!(
            json["conflictDetails"]["conflicts"][0]["type"],
            "modified"
        );
        assert!(json["conflictDetails"]["conflicts"][0]["localValue"].is_boolean());
    }
}
