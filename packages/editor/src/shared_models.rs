//! # Shared Model Index
//!
//! Document-level lookups and links between tiles and shared models. Every
//! change goes through a recorded action on the document tree, so it lands
//! in history and triggers the dependent tile recomputes.
//!
//! Every shared model carries an `indexOfType`, its position among the
//! models of the same type (0, 1, ...). Missing indices are assigned when a
//! document is bound and whenever a model is added, inside the recorded
//! action, so they undo and replay with the rest of the change.
//!
//! Until a document is bound, queries return empty results and mutations are
//! skipped with a warning.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use crate::document;
use crate::tree::Tree;
use crate::HistoryError;

pub const ADD_SHARED_MODEL_ACTION: &str = "/addSharedModel";
pub const ADD_TILE_SHARED_MODEL_ACTION: &str = "/addTileSharedModel";
pub const REMOVE_TILE_SHARED_MODEL_ACTION: &str = "/removeTileSharedModel";
pub const ASSIGN_INDEX_OF_TYPE_ACTION: &str = "/assignIndexOfType";

#[derive(Debug, Default)]
pub struct SharedModelDocumentManager {
    document: RefCell<Option<Rc<Tree>>>,
}

impl SharedModelDocumentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the document, numbering any shared model that has no index yet
    ///
    /// The numbering is recorded without undo.
    pub async fn set_document(&self, tree: Rc<Tree>) -> Result<(), HistoryError> {
        *self.document.borrow_mut() = Some(tree.clone());

        tree
            .action_without_undo(ASSIGN_INDEX_OF_TYPE_ACTION, |state| {
                for id in document::shared_model_ids(state) {
                    document::assign_index_of_type(state, &id)?;
                }
                Ok(())
            })
            .await
    }

    pub fn is_ready(&self) -> bool {
        self.document.borrow().is_some()
    }

    fn document(&self, operation: &str) -> Option<Rc<Tree>> {
        let document = self.document.borrow().clone();
        if document.is_none() {
            warn!(operation, "Shared model manager has no document");
        }
        document
    }

    /// First shared model of a type, preferring one linked to `tile_id`
    pub fn find_first_shared_model_by_type(&self, type_tag: &str, tile_id: Option<&str>) -> Option<Value> {
        let tree = self.document("find_first_shared_model_by_type")?;
        let state = tree.state();

        let of_type = |id: &String| {
            state
                .pointer(&document::shared_model_pointer(id))
                .filter(|snapshot| snapshot.get("type").and_then(Value::as_str) == Some(type_tag))
                .cloned()
        };
        let ids = document::shared_model_ids(&state);

        if let Some(tile_id) = tile_id {
            let linked = ids
                .iter()
                .filter(|id| document::shared_model_tiles(&state, id).iter().any(|tile| tile == tile_id))
                .find_map(of_type);
            if linked.is_some() {
                return linked;
            }
        }
        ids.iter().find_map(of_type)
    }

    pub fn get_shared_models_by_type(&self, type_tag: &str) -> Vec<Value> {
        let Some(tree) = self.document("get_shared_models_by_type") else {
            return Vec::new();
        };
        let state = tree.state();

        document::shared_model_ids(&state)
            .iter()
            .filter_map(|id| state.pointer(&document::shared_model_pointer(id)))
            .filter(|snapshot| snapshot.get("type").and_then(Value::as_str) == Some(type_tag))
            .cloned()
            .collect()
    }

    /// Shared models linked to a tile. The tile must be in the document.
    pub fn get_tile_shared_models(&self, tile_id: &str) -> Vec<Value> {
        let Some(tree) = self.document("get_tile_shared_models") else {
            return Vec::new();
        };
        let state = tree.state();

        if !document::has_tile(&state, tile_id) {
            warn!(tile_id, "Tile is not part of the document");
            return Vec::new();
        }
        document::tile_shared_models(&state, tile_id)
    }

    pub fn get_tile_shared_models_by_type(&self, tile_id: &str, type_tag: &str) -> Vec<Value> {
        self.get_tile_shared_models(tile_id)
            .into_iter()
            .filter(|snapshot| document::snapshot_type(snapshot) == Some(type_tag))
            .collect()
    }

    pub fn get_shared_model_provider(&self, shared_model_id: &str) -> Option<String> {
        let tree = self.document("get_shared_model_provider")?;
        let state = tree.state();
        document::shared_model_provider(&state, shared_model_id)
    }

    pub fn get_shared_model_tile_ids(&self, shared_model_id: &str) -> Vec<String> {
        let Some(tree) = self.document("get_shared_model_tile_ids") else {
            return Vec::new();
        };
        let state = tree.state();
        document::shared_model_tiles(&state, shared_model_id)
    }

    /// Register a shared model that no tile uses yet
    pub async fn add_shared_model(&self, snapshot: Value) -> Result<(), HistoryError> {
        let Some(tree) = self.document("add_shared_model") else {
            return Ok(());
        };
        document::snapshot_id(&snapshot)?;

        tree
            .action(ADD_SHARED_MODEL_ACTION, |state| {
                let id = document::snapshot_id(&snapshot)?;
                if document::shared_model_entry(state, &id).is_none() {
                    document::put_shared_model(state, snapshot.clone())?;
                }
                document::assign_index_of_type(state, &id).map(|_| ())
            })
            .await
    }

    /// Link a tile to a shared model, registering the model if needed
    ///
    /// The tile's recompute hook runs once when the link is new. A provider
    /// tile is the one whose data the shared model holds.
    pub async fn add_tile_shared_model(
        &self,
        tile_id: &str,
        snapshot: Value,
        is_provider: bool,
    ) -> Result<(), HistoryError> {
        let Some(tree) = self.document("add_tile_shared_model") else {
            return Ok(());
        };
        if !document::has_tile(&tree.state(), tile_id) {
            warn!(tile_id, "Cannot link a tile that is not part of the document");
            return Ok(());
        }
        let shared_model_id = document::snapshot_id(&snapshot)?;

        tree
            .action(ADD_TILE_SHARED_MODEL_ACTION, |state| {
                if document::shared_model_entry(state, &shared_model_id).is_none() {
                    document::put_shared_model(state, snapshot)?;
                }
                document::assign_index_of_type(state, &shared_model_id)?;
                document::link_tile(state, &shared_model_id, tile_id, is_provider).map(|_| ())
            })
            .await
    }

    pub async fn remove_tile_shared_model(
        &self,
        tile_id: &str,
        shared_model_id: &str,
    ) -> Result<(), HistoryError> {
        let Some(tree) = self.document("remove_tile_shared_model") else {
            return Ok(());
        };

        tree
            .action(REMOVE_TILE_SHARED_MODEL_ACTION, |state| {
                if !document::unlink_tile(state, shared_model_id, tile_id) {
                    warn!(tile_id, shared_model_id, "Tile was not linked to shared model");
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PlainBehavior;
    use serde_json::json;

    fn sample_document() -> Rc<Tree> {
        Tree::detached(
            "doc",
            json!({
                "tileMap": {
                    "t1": { "id": "t1", "content": { "type": "Text" } },
                    "t2": { "id": "t2", "content": { "type": "Text" } }
                },
                "sharedModelMap": {
                    "a": { "sharedModel": { "id": "a", "type": "Counter" }, "tiles": [] },
                    "b": { "sharedModel": { "id": "b", "type": "Counter" }, "tiles": ["t2"] },
                    "c": { "sharedModel": { "id": "c", "type": "Table" }, "tiles": ["t1"] }
                }
            }),
            PlainBehavior,
        )
    }

    #[tokio::test]
    async fn test_not_ready_without_document() {
        let index = SharedModelDocumentManager::new();
        assert!(!index.is_ready());
        assert!(index.get_shared_models_by_type("Counter").is_empty());
        assert!(index.find_first_shared_model_by_type("Counter", None).is_none());
        assert!(index.get_tile_shared_models("t1").is_empty());

        index.add_shared_model(json!({ "id": "x" })).await.unwrap();
        assert!(!index.is_ready());
    }

    async fn bound(tree: Rc<Tree>) -> SharedModelDocumentManager {
        let index = SharedModelDocumentManager::new();
        index.set_document(tree).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_queries() {
        let index = bound(sample_document()).await;
        assert!(index.is_ready());

        assert_eq!(index.get_shared_models_by_type("Counter").len(), 2);
        assert_eq!(
            index.find_first_shared_model_by_type("Counter", None).unwrap()["id"],
            json!("a")
        );
        assert_eq!(
            index.find_first_shared_model_by_type("Counter", Some("t2")).unwrap()["id"],
            json!("b")
        );
        assert_eq!(index.get_tile_shared_models("t1")[0]["id"], json!("c"));
        assert!(index.get_tile_shared_models("missing").is_empty());
        assert_eq!(index.get_shared_model_tile_ids("b"), vec!["t2"]);
        assert_eq!(index.get_tile_shared_models_by_type("t2", "Counter").len(), 1);
        assert!(index.get_tile_shared_models_by_type("t2", "Table").is_empty());
    }

    #[tokio::test]
    async fn test_set_document_assigns_indices() {
        let tree = sample_document();
        let _index = bound(tree.clone()).await;

        assert_eq!(tree.get("/sharedModelMap/a/sharedModel/indexOfType"), Some(json!(0)));
        assert_eq!(tree.get("/sharedModelMap/b/sharedModel/indexOfType"), Some(json!(1)));
        assert_eq!(tree.get("/sharedModelMap/c/sharedModel/indexOfType"), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_added_models_get_next_index() {
        let tree = sample_document();
        let index = bound(tree.clone()).await;

        index
            .add_shared_model(json!({ "id": "x", "type": "Counter" }))
            .await
            .unwrap();
        index
            .add_tile_shared_model("t1", json!({ "id": "y", "type": "Counter" }), false)
            .await
            .unwrap();

        assert_eq!(tree.get("/sharedModelMap/x/sharedModel/indexOfType"), Some(json!(2)));
        assert_eq!(tree.get("/sharedModelMap/y/sharedModel/indexOfType"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_provider_tile() {
        let tree = sample_document();
        let index = bound(tree.clone()).await;

        index
            .add_tile_shared_model("t1", json!({ "id": "p", "type": "Table" }), true)
            .await
            .unwrap();
        assert_eq!(index.get_shared_model_provider("p"), Some("t1".to_string()));

        index
            .add_tile_shared_model("t2", json!({ "id": "p", "type": "Table" }), false)
            .await
            .unwrap();
        assert_eq!(index.get_shared_model_tile_ids("p"), vec!["t1", "t2"]);
        assert_eq!(index.get_shared_model_provider("p"), Some("t1".to_string()));

        index.remove_tile_shared_model("t1", "p").await.unwrap();
        assert_eq!(index.get_shared_model_provider("p"), None);
    }

    #[tokio::test]
    async fn test_link_and_unlink() {
        let tree = sample_document();
        let index = bound(tree.clone()).await;

        index
            .add_tile_shared_model("t1", json!({ "id": "d", "type": "Counter" }), false)
            .await
            .unwrap();
        assert_eq!(index.get_shared_model_tile_ids("d"), vec!["t1"]);

        index.remove_tile_shared_model("t1", "d").await.unwrap();
        assert!(index.get_shared_model_tile_ids("d").is_empty());
        assert!(tree.get("/sharedModelMap/d/sharedModel").is_some());

        // Unknown tiles are left alone
        index
            .add_tile_shared_model("nope", json!({ "id": "e", "type": "Counter" }), false)
            .await
            .unwrap();
        assert!(tree.get("/sharedModelMap/e").is_none());
    }
}
