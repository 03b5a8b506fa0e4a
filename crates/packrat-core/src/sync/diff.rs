//! Structural diff over JSON values.
//!
//! One shared utility backs both conflict detection in the pull pipeline
//! and field-level merging in the conflict resolver: it enumerates leaf
//! divergences as dot-separated paths (array indices are path segments,
//! e.g. `days.0.items.1.packed`) and can read, write, and remove values at
//! those paths.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// How a field differs between the local and server snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present on both sides with different values.
    Modified,
    /// Present only on the server side.
    Added,
    /// Present only on the local side.
    Removed,
}

/// A single leaf divergence between two snapshots of the same entity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub path: String,
    /// `Null` when the field is absent locally.
    pub local_value: Value,
    /// `Null` when the field is absent on the server.
    pub server_value: Value,
    #[serde(rename = "type")]
    pub kind: DiffKind,
}

/// Enumerate every leaf path where `local` and `server` diverge.
#[must_use]
pub fn diff_values(local: &Value, server: &Value) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    walk(local, server, String::new(), &mut diffs);
    diffs
}

fn walk(local: &Value, server: &Value, path: String, diffs: &mut Vec<FieldDiff>) {
    match (local, server) {
        (Value::Object(l), Value::Object(s)) => {
            for (key, l_val) in l {
                let child = join(&path, key);
                match s.get(key) {
                    Some(s_val) => walk(l_val, s_val, child, diffs),
                    None => diffs.push(FieldDiff {
                        path: child,
                        local_value: l_val.clone(),
                        server_value: Value::Null,
                        kind: DiffKind::Removed,
                    }),
                }
            }
            for (key, s_val) in s {
                if !l.contains_key(key) {
                    diffs.push(FieldDiff {
                        path: join(&path, key),
                        local_value: Value::Null,
                        server_value: s_val.clone(),
                        kind: DiffKind::Added,
                    });
                }
            }
        }
        (Value::Array(l), Value::Array(s)) => {
            for index in 0..l.len().max(s.len()) {
                let child = join(&path, &index.to_string());
                match (l.get(index), s.get(index)) {
                    (Some(l_val), Some(s_val)) => walk(l_val, s_val, child, diffs),
                    (Some(l_val), None) => diffs.push(FieldDiff {
                        path: child,
                        local_value: l_val.clone(),
                        server_value: Value::Null,
                        kind: DiffKind::Removed,
                    }),
                    (None, Some(s_val)) => diffs.push(FieldDiff {
                        path: child,
                        local_value: Value::Null,
                        server_value: s_val.clone(),
                        kind: DiffKind::Added,
                    }),
                    (None, None) => {}
                }
            }
        }
        (l, s) => {
            if l != s {
                diffs.push(FieldDiff {
                    path,
                    local_value: l.clone(),
                    server_value: s.clone(),
                    kind: DiffKind::Modified,
                });
            }
        }
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

/// Pre-compute the non-conflicting merge of two snapshots: the local value
/// everywhere, plus server-only additions. Paths that genuinely conflict
/// (`Modified`) keep the local value and await an explicit choice.
#[must_use]
pub fn merge_non_conflicting(local: &Value, diffs: &[FieldDiff]) -> Value {
    let mut merged = local.clone();
    for diff in diffs {
        if diff.kind == DiffKind::Added {
            set_path(&mut merged, &diff.path, diff.server_value.clone());
        }
    }
    merged
}

/// Read the value at a dot-separated path.
#[must_use]
pub fn get_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new_value` at a dot-separated path, creating intermediate objects
/// and padding arrays with `Null` as needed.
pub fn set_path(target: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = target;

    for (index, segment) in segments.iter().enumerate() {
        let last = index == segments.len() - 1;
        let array_index = segment.parse::<usize>().ok();

        // Coerce the container to match the segment kind
        match (array_index, &mut *current) {
            (Some(_), Value::Array(_)) | (None, Value::Object(_)) => {}
            (Some(_), slot) => *slot = Value::Array(Vec::new()),
            (None, slot) => *slot = Value::Object(Map::new()),
        }

        match (array_index, &mut *current) {
            (Some(i), Value::Array(items)) => {
                while items.len() <= i {
                    items.push(Value::Null);
                }
                if last {
                    items[i] = new_value;
                    return;
                }
                current = &mut items[i];
            }
            (None, Value::Object(map)) => {
                if last {
                    map.insert((*segment).to_string(), new_value);
                    return;
                }
                current = map.entry((*segment).to_string()).or_insert(Value::Null);
            }
            _ => unreachable!("container coerced above"),
        }
    }
}

/// Remove the value at a dot-separated path, if present. Array elements are
/// nulled rather than removed so sibling indices stay stable.
pub fn remove_path(target: &mut Value, path: &str) -> Result<()> {
    let Some((parent_path, leaf)) = path.rsplit_once('.') else {
        return remove_leaf(target, path);
    };
    let mut current = target;
    for segment in parent_path.split('.') {
        current = match current {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| Error::InvalidInput(format!("no such path: {path}")))?,
            Value::Array(items) => {
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidInput(format!("bad path segment: {segment}")))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| Error::InvalidInput(format!("no such path: {path}")))?
            }
            _ => return Err(Error::InvalidInput(format!("no such path: {path}"))),
        };
    }
    remove_leaf(current, leaf)
}

fn remove_leaf(container: &mut Value, leaf: &str) -> Result<()> {
    match container {
        Value::Object(map) => {
            map.remove(leaf);
            Ok(())
        }
        Value::Array(items) => {
            let index = leaf
                .parse::<usize>()
                .map_err(|_| Error::InvalidInput(format!("bad path segment: {leaf}")))?;
            if let Some(slot) = items.get_mut(index) {
                *slot = Value::Null;
            }
            Ok(())
        }
        _ => Err(Error::InvalidInput(format!("cannot remove from leaf: {leaf}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn diff_reports_one_entry_per_leaf_divergence() {
        let local = json!({"id": "t1", "days": [{"items": [{"packed": false}]}], "updatedAt": "T1"});
        let server = json!({"id": "t1", "days": [{"items": [{"packed": true}]}], "updatedAt": "T2"});

        let diffs = diff_values(&local, &server);
        assert_eq!(diffs.len(), 2);

        let packed = diffs
            .iter()
            .find(|d| d.path == "days.0.items.0.packed")
            .unwrap();
        assert_eq!(packed.kind, DiffKind::Modified);
        assert_eq!(packed.local_value, json!(false));
        assert_eq!(packed.server_value, json!(true));
    }

    #[test]
    fn diff_reports_added_and_removed_fields() {
        let local = json!({"a": 1, "onlyLocal": true});
        let server = json!({"a": 1, "onlyServer": 2});

        let diffs = diff_values(&local, &server);
        assert_eq!(diffs.len(), 2);
        assert!(diffs
            .iter()
            .any(|d| d.path == "onlyLocal" && d.kind == DiffKind::Removed));
        assert!(diffs
            .iter()
            .any(|d| d.path == "onlyServer" && d.kind == DiffKind::Added));
    }

    #[test]
    fn diff_handles_array_length_mismatch() {
        let local = json!({"days": [1, 2]});
        let server = json!({"days": [1, 2, 3]});

        let diffs = diff_values(&local, &server);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "days.2");
        assert_eq!(diffs[0].kind, DiffKind::Added);
    }

    #[test]
    fn identical_values_produce_no_diffs() {
        let value = json!({"a": {"b": [1, {"c": null}]}});
        assert!(diff_values(&value, &value).is_empty());
    }

    #[test]
    fn merge_non_conflicting_keeps_local_for_modified() {
        let local = json!({"name": "Ada", "age": 30});
        let server = json!({"name": "Grace", "email": "g@example.com"});
        let diffs = diff_values(&local, &server);

        let merged = merge_non_conflicting(&local, &diffs);
        assert_eq!(merged["name"], "Ada"); // conflicting, stays local
        assert_eq!(merged["age"], 30); // local-only, kept
        assert_eq!(merged["email"], "g@example.com"); // server addition
    }

    #[test]
    fn get_and_set_path_round_trip() {
        let mut value = json!({"days": [{"items": [{"packed": false}]}]});
        assert_eq!(
            get_path(&value, "days.0.items.0.packed"),
            Some(&json!(false))
        );

        set_path(&mut value, "days.0.items.0.packed", json!(true));
        assert_eq!(get_path(&value, "days.0.items.0.packed"), Some(&json!(true)));

        // Creates missing intermediates
        set_path(&mut value, "days.1.location", json!("Zermatt"));
        assert_eq!(get_path(&value, "days.1.location"), Some(&json!("Zermatt")));
    }

    #[test]
    fn remove_path_nulls_array_slots_and_drops_keys() {
        let mut value = json!({"days": [1, 2], "name": "Ada"});
        remove_path(&mut value, "name").unwrap();
        assert!(value.get("name").is_none());

        remove_path(&mut value, "days.0").unwrap();
        assert_eq!(value["days"], json!([null, 2]));
    }
}
