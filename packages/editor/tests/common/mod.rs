//! Shared fixtures: a text tile derived from a shared model's `value`
#![allow(dead_code)]

use std::rc::Rc;

use futures::future::{pending, FutureExt, LocalBoxFuture};
use serde_json::{json, Value};
use tiledoc_editor::{
    ContentRegistry, DocumentBehavior, HistoryError, JsonPatch, ManagerConfig, SharedModelKind,
    TileContent, Tree, TreeClient, TreeManager,
};

pub const TEST_TILE: &str = "TestTile";
pub const TEST_SHARED_MODEL: &str = "TestSharedModel";
pub const SET_VALUE: &str = "/sharedModelMap/sm1/sharedModel/setValue";

/// `text` mirrors the first linked shared model's `value` with a `-tile` suffix
pub struct TestTile;

impl TileContent for TestTile {
    fn type_tag(&self) -> &str {
        TEST_TILE
    }

    fn default_content(&self) -> Value {
        json!({ "type": TEST_TILE, "text": null })
    }

    fn update_after_shared_model_changes(
        &self,
        content: &mut Value,
        shared_models: &[Value],
    ) -> Result<(), HistoryError> {
        let text = shared_models
            .first()
            .and_then(|model| model.get("value"))
            .and_then(Value::as_str)
            .map(|value| Value::from(format!("{value}-tile")))
            .unwrap_or(Value::Null);
        content["text"] = text;
        Ok(())
    }
}

pub struct TestSharedModel;

impl SharedModelKind for TestSharedModel {
    fn type_tag(&self) -> &str {
        TEST_SHARED_MODEL
    }

    fn default_snapshot(&self, id: &str) -> Value {
        json!({ "id": id, "type": TEST_SHARED_MODEL, "value": null })
    }
}

pub fn registry() -> Rc<ContentRegistry> {
    ContentRegistry::builder()
        .register_tile(TestTile)
        .register_shared_model(TestSharedModel)
        .build()
}

/// Document with one tile per id, all linked to shared model `sm1`
pub fn linked_document(tile_ids: &[&str]) -> Value {
    let tiles: serde_json::Map<String, Value> = tile_ids
        .iter()
        .map(|id| {
            (
                id.to_string(),
                json!({ "id": id, "content": { "type": TEST_TILE, "text": null } }),
            )
        })
        .collect();

    json!({
        "tileMap": tiles,
        "sharedModelMap": {
            "sm1": {
                "sharedModel": { "id": "sm1", "type": TEST_SHARED_MODEL, "value": null },
                "tiles": tile_ids
            }
        }
    })
}

pub fn manager() -> Rc<TreeManager> {
    TreeManager::new(ManagerConfig::default())
}

/// Manager with a single document tree `t1` holding tile `t1`
pub fn setup() -> (Rc<TreeManager>, Rc<Tree>) {
    let manager = manager();
    let tree = manager.attach_tree(
        "t1",
        linked_document(&["t1"]),
        DocumentBehavior::new(registry()),
    );
    (manager, tree)
}

pub async fn set_value(tree: &Tree, value: &str) -> Result<(), HistoryError> {
    let value = value.to_string();
    tree.action(SET_VALUE, move |state| {
        state["sharedModelMap"]["sm1"]["sharedModel"]["value"] = Value::from(value);
        Ok(())
    })
    .await
}

pub fn shared_value(tree: &Tree) -> Value {
    tree.get("/sharedModelMap/sm1/sharedModel/value")
        .unwrap_or(Value::Null)
}

pub fn tile_text(tree: &Tree, tile_id: &str) -> Value {
    tree.get(&format!("/tileMap/{tile_id}/content/text"))
        .unwrap_or(Value::Null)
}

/// Tree that references `sm1` but never answers the manager
pub struct SilentTree {
    pub id: String,
}

impl TreeClient for SilentTree {
    fn tree_id(&self) -> &str {
        &self.id
    }

    fn references_shared_model(&self, shared_model_id: &str) -> bool {
        shared_model_id == "sm1"
    }

    fn apply_shared_model_snapshot_from_manager<'a>(
        &'a self,
        _entry_id: &'a str,
        _exchange_id: &'a str,
        _snapshot: &'a Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        pending().boxed_local()
    }

    fn start_applying_patches_from_manager<'a>(
        &'a self,
        _entry_id: &'a str,
        _exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        pending().boxed_local()
    }

    fn apply_patches_from_manager<'a>(
        &'a self,
        _entry_id: &'a str,
        _exchange_id: &'a str,
        _patches: &'a [JsonPatch],
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        pending().boxed_local()
    }

    fn finish_applying_patches_from_manager<'a>(
        &'a self,
        _entry_id: &'a str,
        _exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        pending().boxed_local()
    }
}
