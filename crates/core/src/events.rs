//! Real-time channel contract for shared lists.
//!
//! Every list has one private channel, `private-todolist.{id}`, carrying
//! exactly four event names. Alternative spellings (`.item.created`,
//! `ItemCreated`, ...) are not recognised.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::models::{ItemPatch, TodoItem};
use crate::types::DbId;

/// Prefix the channel provider requires for authenticated channels.
pub const PRIVATE_PREFIX: &str = "private-";

pub const ITEM_CREATED: &str = "item.created";
pub const ITEM_UPDATED: &str = "item.updated";
pub const ITEM_COMPLETED: &str = "item.completed";
pub const ITEM_DELETED: &str = "item.deleted";

/// The event names a list subscription registers for.
pub const ITEM_EVENTS: &[&str] = &[ITEM_CREATED, ITEM_UPDATED, ITEM_COMPLETED, ITEM_DELETED];

/// Channel name for a list's item events.
pub fn list_channel(list_id: DbId) -> String {
    format!("{PRIVATE_PREFIX}todolist.{list_id}")
}

/// Recover the list id from a channel name produced by [`list_channel`].
pub fn list_id_from_channel(channel: &str) -> Option<DbId> {
    channel
        .strip_prefix(PRIVATE_PREFIX)?
        .strip_prefix("todolist.")?
        .parse()
        .ok()
}

/// A state transition for one list's item collection.
///
/// Produced both by inbound channel events and by local optimistic
/// mutations; the reconciler treats the two identically.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    Created(TodoItem),
    Updated(ItemPatch),
    Completed { id: DbId, completed: bool },
    Deleted { id: DbId },
}

impl ItemEvent {
    /// Identifier of the item this event targets.
    pub fn item_id(&self) -> DbId {
        match self {
            ItemEvent::Created(item) => item.id,
            ItemEvent::Updated(patch) => patch.id,
            ItemEvent::Completed { id, .. } | ItemEvent::Deleted { id } => *id,
        }
    }

    /// Decode a channel event.
    ///
    /// Returns `Ok(None)` for event names outside the contract so the caller
    /// can ignore them, and `Err` for a known event with a malformed payload.
    pub fn parse(event: &str, data: &Value) -> Result<Option<Self>, CoreError> {
        let parsed = match event {
            ITEM_CREATED => ItemEvent::Created(item_payload(data)?),
            ITEM_UPDATED => ItemEvent::Updated(item_payload(data)?),
            ITEM_COMPLETED => {
                let patch: ItemPatch = item_payload(data)?;
                let completed = patch.completed.ok_or_else(|| {
                    CoreError::Malformed(format!("{ITEM_COMPLETED} without a completion flag"))
                })?;
                ItemEvent::Completed {
                    id: patch.id,
                    completed,
                }
            }
            ITEM_DELETED => {
                let payload: DeletedPayload = serde_json::from_value(data.clone())
                    .map_err(|e| CoreError::Malformed(format!("{ITEM_DELETED}: {e}")))?;
                ItemEvent::Deleted {
                    id: payload.item_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

#[derive(Deserialize)]
struct DeletedPayload {
    #[serde(rename = "itemId", alias = "item_id")]
    item_id: DbId,
}

/// Item events carry `{"item": {...}}`; a bare item object is accepted too.
fn item_payload<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, CoreError> {
    let inner = match data.get("item") {
        Some(item) if item.is_object() => item,
        _ => data,
    };
    serde_json::from_value(inner.clone()).map_err(|e| CoreError::Malformed(e.to_string()))
}
