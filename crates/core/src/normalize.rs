//! Response envelope normalization.
//!
//! The REST API is inconsistent about where it puts collections: a bare
//! array, `{"data": [...]}`, `{"items": [...]}` or `{"data": {"items":
//! [...]}}`. These helpers flatten every known shape into a plain `Vec`
//! and treat anything else as an empty collection rather than an error.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{TodoItem, TodoList, UserRef};

/// Extract the item collection from a `todos/show/{id}` response.
///
/// Shapes are checked in order: `items`, `data` (array), bare array,
/// `data.items`. Entries that fail to parse (most commonly: no `id`) are
/// dropped.
pub fn extract_items(body: &Value) -> Vec<TodoItem> {
    let array = body
        .get("items")
        .and_then(Value::as_array)
        .or_else(|| body.get("data").and_then(Value::as_array))
        .or_else(|| body.as_array())
        .or_else(|| {
            body.get("data")
                .and_then(|d| d.get("items"))
                .and_then(Value::as_array)
        });

    match array {
        Some(entries) => parse_entries(entries, "item"),
        None => {
            tracing::debug!("Item response had no recognisable collection, using empty list");
            Vec::new()
        }
    }
}

/// Extract the list collection from a `todos/list` response (bare array
/// or `{"data": [...]}`).
pub fn extract_lists(body: &Value) -> Vec<TodoList> {
    let array = body
        .as_array()
        .or_else(|| body.get("data").and_then(Value::as_array));

    match array {
        Some(entries) => parse_entries(entries, "list"),
        None => {
            tracing::warn!("List response was not an array, using empty list");
            Vec::new()
        }
    }
}

/// Extract user search results (`{"data": [...]}`).
pub fn extract_users(body: &Value) -> Vec<UserRef> {
    match body.get("data").and_then(Value::as_array) {
        Some(entries) => parse_entries(entries, "user"),
        None => Vec::new(),
    }
}

/// Extract a single entity from `{"data": {...}}` or a bare object.
pub fn extract_entity<T: DeserializeOwned>(body: &Value) -> Option<T> {
    let candidate = match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    };
    if !candidate.is_object() {
        return None;
    }
    serde_json::from_value(candidate.clone()).ok()
}

fn parse_entries<T: DeserializeOwned>(entries: &[Value], kind: &'static str) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<T>(entry.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(kind, error = %e, "Discarding malformed entry");
                None
            }
        })
        .collect()
}
