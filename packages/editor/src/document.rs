//! # Tile Documents
//!
//! Layout of a document tree and the behaviour that keeps its tiles in sync
//! with the shared models they reference.
//!
//! ```text
//! {
//!   "tileMap": {
//!     "<tileId>": { "id": "<tileId>", "content": { "type": "<TileType>", ... } }
//!   },
//!   "sharedModelMap": {
//!     "<modelId>": {
//!       "sharedModel": { "id": "<modelId>", "type": "<ModelType>", "indexOfType": 0, ... },
//!       "tiles": ["<tileId>", ...],
//!       "provider": "<tileId>"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::patch::join_pointer;
use crate::registry::ContentRegistry;
use crate::tree::TreeBehavior;
use crate::HistoryError;

pub const TILE_MAP: &str = "tileMap";
pub const SHARED_MODEL_MAP: &str = "sharedModelMap";
pub const INDEX_OF_TYPE: &str = "indexOfType";

/// Empty document state
pub fn empty_document() -> Value {
    json!({ TILE_MAP: {}, SHARED_MODEL_MAP: {} })
}

/// Pointer to a shared model's entry (snapshot plus tile links)
pub fn shared_model_entry_pointer(shared_model_id: &str) -> String {
    join_pointer(&format!("/{SHARED_MODEL_MAP}"), shared_model_id)
}

/// Pointer to a shared model's snapshot
pub fn shared_model_pointer(shared_model_id: &str) -> String {
    format!("{}/sharedModel", shared_model_entry_pointer(shared_model_id))
}

pub fn tile_content_pointer(tile_id: &str) -> String {
    format!("{}/content", join_pointer(&format!("/{TILE_MAP}"), tile_id))
}

pub fn shared_model_entry<'a>(state: &'a Value, shared_model_id: &str) -> Option<&'a Value> {
    state.get(SHARED_MODEL_MAP)?.get(shared_model_id)
}

/// Ids of every shared model in the document, in key order
pub fn shared_model_ids(state: &Value) -> Vec<String> {
    state
        .get(SHARED_MODEL_MAP)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Tiles linked to a shared model
pub fn shared_model_tiles(state: &Value, shared_model_id: &str) -> Vec<String> {
    shared_model_entry(state, shared_model_id)
        .and_then(|entry| entry.get("tiles"))
        .and_then(Value::as_array)
        .map(|tiles| {
            tiles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Snapshots of the shared models a tile is linked to
pub fn tile_shared_models(state: &Value, tile_id: &str) -> Vec<Value> {
    shared_model_ids(state)
        .iter()
        .filter(|id| shared_model_tiles(state, id).iter().any(|tile| tile == tile_id))
        .filter_map(|id| state.pointer(&shared_model_pointer(id)).cloned())
        .collect()
}

/// Tile that provides a shared model's data, if one was linked as provider
pub fn shared_model_provider(state: &Value, shared_model_id: &str) -> Option<String> {
    shared_model_entry(state, shared_model_id)?
        .get("provider")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn snapshot_type(snapshot: &Value) -> Option<&str> {
    snapshot.get("type").and_then(Value::as_str)
}

/// Position of a shared model among the models of its type. Negative or
/// missing means unassigned.
pub fn index_of_type(snapshot: &Value) -> Option<u64> {
    snapshot.get(INDEX_OF_TYPE).and_then(Value::as_u64)
}

pub fn has_tile(state: &Value, tile_id: &str) -> bool {
    state
        .get(TILE_MAP)
        .and_then(|tiles| tiles.get(tile_id))
        .is_some()
}

/// Id carried by a shared model snapshot
pub fn snapshot_id(snapshot: &Value) -> Result<String, HistoryError> {
    snapshot
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HistoryError::action("shared model snapshot has no id"))
}

fn object_entry<'a>(state: &'a mut Value, key: &str) -> Result<&'a mut Map<String, Value>, HistoryError> {
    let root = state
        .as_object_mut()
        .ok_or_else(|| HistoryError::action("document root is not an object"))?;
    root.entry(key.to_string())
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| HistoryError::action(format!("{key} is not an object")))
}

/// Insert or replace a tile
pub fn put_tile(state: &mut Value, tile_id: &str, content: Value) -> Result<(), HistoryError> {
    object_entry(state, TILE_MAP)?.insert(
        tile_id.to_string(),
        json!({ "id": tile_id, "content": content }),
    );
    Ok(())
}

/// Store a shared model snapshot, keeping any existing tile links
pub fn put_shared_model(state: &mut Value, snapshot: Value) -> Result<String, HistoryError> {
    let id = snapshot_id(&snapshot)?;
    let entry = object_entry(state, SHARED_MODEL_MAP)?
        .entry(id.clone())
        .or_insert_with(|| json!({ "tiles": [] }));
    entry["sharedModel"] = snapshot;
    Ok(id)
}

/// Give a shared model the lowest index not taken by another model of the
/// same type. Returns false if it already had one.
pub fn assign_index_of_type(state: &mut Value, shared_model_id: &str) -> Result<bool, HistoryError> {
    let pointer = shared_model_pointer(shared_model_id);
    let snapshot = state
        .pointer(&pointer)
        .ok_or_else(|| HistoryError::action(format!("unknown shared model {shared_model_id}")))?;
    if index_of_type(snapshot).is_some() {
        return Ok(false);
    }
    let type_tag = snapshot_type(snapshot).map(str::to_string);

    let used: BTreeSet<u64> = shared_model_ids(state)
        .iter()
        .filter(|id| id.as_str() != shared_model_id)
        .filter_map(|id| state.pointer(&shared_model_pointer(id)))
        .filter(|other| snapshot_type(other) == type_tag.as_deref())
        .filter_map(index_of_type)
        .collect();
    let mut index = 0;
    while used.contains(&index) {
        index += 1;
    }

    state
        .pointer_mut(&pointer)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| HistoryError::action(format!("shared model {shared_model_id} is not an object")))?
        .insert(INDEX_OF_TYPE.to_string(), json!(index));
    Ok(true)
}

/// Link a tile to a shared model, optionally as its provider. Returns false
/// if it was already linked.
pub fn link_tile(
    state: &mut Value,
    shared_model_id: &str,
    tile_id: &str,
    is_provider: bool,
) -> Result<bool, HistoryError> {
    let entry = object_entry(state, SHARED_MODEL_MAP)?
        .get_mut(shared_model_id)
        .ok_or_else(|| HistoryError::action(format!("unknown shared model {shared_model_id}")))?
        .as_object_mut()
        .ok_or_else(|| HistoryError::action(format!("shared model entry {shared_model_id} is not an object")))?;

    let tiles = entry
        .entry("tiles")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| HistoryError::action(format!("tiles of {shared_model_id} is not an array")))?;
    if tiles.iter().any(|tile| tile.as_str() == Some(tile_id)) {
        return Ok(false);
    }
    tiles.push(Value::from(tile_id));

    if is_provider {
        entry.insert("provider".to_string(), Value::from(tile_id));
    }
    Ok(true)
}

/// Unlink a tile from a shared model, dropping it as provider. Returns false
/// if it was not linked.
pub fn unlink_tile(state: &mut Value, shared_model_id: &str, tile_id: &str) -> bool {
    let Some(entry) = state
        .pointer_mut(&shared_model_entry_pointer(shared_model_id))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };

    if entry.get("provider").and_then(Value::as_str) == Some(tile_id) {
        entry.remove("provider");
    }

    let Some(tiles) = entry.get_mut("tiles").and_then(Value::as_array_mut) else {
        return false;
    };
    let before = tiles.len();
    tiles.retain(|tile| tile.as_str() != Some(tile_id));
    tiles.len() != before
}

/// Document tree behaviour backed by a content registry
#[derive(Debug, Clone)]
pub struct DocumentBehavior {
    registry: Rc<ContentRegistry>,
}

impl DocumentBehavior {
    pub fn new(registry: Rc<ContentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }
}

impl TreeBehavior for DocumentBehavior {
    fn update_tile_after_shared_model_changes(
        &self,
        state: &mut Value,
        tile_id: &str,
    ) -> Result<(), HistoryError> {
        let shared_models = tile_shared_models(state, tile_id);

        let Some(content) = state.pointer_mut(&tile_content_pointer(tile_id)) else {
            warn!(tile_id, "Shared model references a tile that is not in the document");
            return Ok(());
        };
        let Some(tile) = self.registry.tile_for(content) else {
            debug!(tile_id, "No registered content type for tile");
            return Ok(());
        };

        tile.update_after_shared_model_changes(content, &shared_models)
    }

    fn apply_shared_model_snapshot(
        &self,
        state: &mut Value,
        snapshot: &Value,
    ) -> Result<(), HistoryError> {
        put_shared_model(state, snapshot.clone()).map(|_| ())
    }
}
