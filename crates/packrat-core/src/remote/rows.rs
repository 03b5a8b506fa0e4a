//! Wire row translation.
//!
//! Remote tables use snake_case columns mapped 1:1 to the entities'
//! camelCase fields. Only top-level keys are renamed; nested structures
//! (`days`, `settings`, `conditions`, `calculation`, ...) live in Json
//! columns and pass through untouched.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::Syncable;

/// Translate an entity into its remote row representation.
pub fn entity_to_row<T: Syncable>(entity: &T) -> Result<Value> {
    let value = serde_json::to_value(entity)?;
    object_to_row(value)
}

/// Translate a remote row into a domain entity, defaulting any missing
/// optional columns through the entity's serde defaults.
pub fn row_to_entity<T: Syncable>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row_to_object(row)?)?)
}

/// Rename the top-level keys of an entity-shaped object to snake_case.
/// Used directly for partial payloads, which are already plain objects.
pub fn object_to_row(value: Value) -> Result<Value> {
    map_keys(value, camel_to_snake)
}

/// Rename the top-level keys of a row to camelCase.
pub fn row_to_object(value: Value) -> Result<Value> {
    map_keys(value, snake_to_camel)
}

/// Extract the `updated_at` column from a raw row.
pub fn row_updated_at(row: &Value) -> Result<DateTime<Utc>> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Remote("row is missing updated_at".to_string()))?
        .parse::<DateTime<Utc>>()
        .map_err(|e| Error::Remote(format!("bad updated_at in row: {e}")))
}

/// Extract the `id` column from a raw row.
pub fn row_id(row: &Value) -> Result<&str> {
    row.get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Remote("row is missing id".to_string()))
}

fn map_keys(value: Value, rename: fn(&str) -> String) -> Result<Value> {
    let Value::Object(map) = value else {
        return Err(Error::InvalidInput(
            "row payloads must be JSON objects".to_string(),
        ));
    };
    let mapped: Map<String, Value> = map
        .into_iter()
        .map(|(key, value)| (rename(&key), value))
        .collect();
    Ok(Value::Object(mapped))
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
