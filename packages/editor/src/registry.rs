//! # Content Registry
//!
//! Maps the `type` tag stored in tile content and shared model snapshots to
//! the implementation that knows how to build and update them.
//!
//! Registration happens up front through a [`RegistryBuilder`]; once built,
//! the registry is immutable and every lookup is a plain map access.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{json, Value};
use tracing::warn;

use crate::HistoryError;

/// Type tag given to shared model snapshots without a registered type
pub const UNKNOWN_SHARED_MODEL: &str = "unknownSharedModel";

/// Behaviour of one kind of tile content
pub trait TileContent {
    fn type_tag(&self) -> &str;

    /// Initial content of a freshly created tile
    fn default_content(&self) -> Value {
        json!({ "type": self.type_tag() })
    }

    /// Bring derived tile state in line with the shared models it references
    fn update_after_shared_model_changes(
        &self,
        _content: &mut Value,
        _shared_models: &[Value],
    ) -> Result<(), HistoryError> {
        Ok(())
    }
}

/// Behaviour of one kind of shared model
pub trait SharedModelKind {
    fn type_tag(&self) -> &str;

    fn default_snapshot(&self, id: &str) -> Value {
        json!({ "id": id, "type": self.type_tag() })
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    tiles: BTreeMap<String, Rc<dyn TileContent>>,
    shared_models: BTreeMap<String, Rc<dyn SharedModelKind>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tile(mut self, tile: impl TileContent + 'static) -> Self {
        let tag = tile.type_tag().to_string();
        if self.tiles.insert(tag.clone(), Rc::new(tile)).is_some() {
            warn!(type_tag = %tag, "Tile type registered twice, keeping the latest");
        }
        self
    }

    pub fn register_shared_model(mut self, model: impl SharedModelKind + 'static) -> Self {
        let tag = model.type_tag().to_string();
        if self.shared_models.insert(tag.clone(), Rc::new(model)).is_some() {
            warn!(type_tag = %tag, "Shared model type registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> Rc<ContentRegistry> {
        Rc::new(ContentRegistry {
            tiles: self.tiles,
            shared_models: self.shared_models,
        })
    }
}

/// Resolved tile and shared model implementations
pub struct ContentRegistry {
    tiles: BTreeMap<String, Rc<dyn TileContent>>,
    shared_models: BTreeMap<String, Rc<dyn SharedModelKind>>,
}

impl ContentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn tile(&self, type_tag: &str) -> Option<Rc<dyn TileContent>> {
        self.tiles.get(type_tag).cloned()
    }

    pub fn shared_model(&self, type_tag: &str) -> Option<Rc<dyn SharedModelKind>> {
        self.shared_models.get(type_tag).cloned()
    }

    /// Implementation for a tile content snapshot, resolved from its `type`
    pub fn tile_for(&self, content: &Value) -> Option<Rc<dyn TileContent>> {
        content.get("type").and_then(Value::as_str).and_then(|tag| self.tile(tag))
    }

    /// Registered type of a shared model snapshot, or [`UNKNOWN_SHARED_MODEL`]
    pub fn shared_model_type<'a>(&self, snapshot: &'a Value) -> &'a str {
        match snapshot.get("type").and_then(Value::as_str) {
            Some(tag) if self.shared_models.contains_key(tag) => tag,
            _ => UNKNOWN_SHARED_MODEL,
        }
    }

    pub fn create_tile_content(&self, type_tag: &str) -> Option<Value> {
        self.tile(type_tag).map(|tile| tile.default_content())
    }

    pub fn create_shared_model(&self, type_tag: &str, id: &str) -> Option<Value> {
        self.shared_model(type_tag).map(|model| model.default_snapshot(id))
    }

    pub fn tile_types(&self) -> impl Iterator<Item = &str> {
        self.tiles.keys().map(String::as_str)
    }

    pub fn shared_model_types(&self) -> impl Iterator<Item = &str> {
        self.shared_models.keys().map(String::as_str)
    }
}

impl fmt::Debug for ContentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentRegistry")
            .field("tiles", &self.tiles.keys().collect::<Vec<_>>())
            .field("shared_models", &self.shared_models.keys().collect::<Vec<_>>())
            .finish()
    }
}
