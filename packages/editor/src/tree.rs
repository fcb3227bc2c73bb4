//! # Trees
//!
//! A tree is one independently owned piece of document state: a tile
//! document, or a standalone shared model. Trees talk to the manager through
//! two narrow interfaces wired at construction:
//!
//! ```text
//!            TreeHost (implemented by TreeManager)
//!   Tree  ─────────────────────────────────────────▶  TreeManager
//!         ◀─────────────────────────────────────────
//!            TreeClient (implemented by every tree)
//! ```
//!
//! Concrete trees customise shared model handling through [`TreeBehavior`].

use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::warn;

use crate::document;
use crate::history::TreeRecordEntry;
use crate::monitor::{ActionCall, CallKind};
use crate::patch::{apply_patches, JsonPatch};
use crate::HistoryError;

pub const START_APPLYING_ACTION: &str = "startApplyingPatchesFromManager";
pub const APPLY_PATCHES_ACTION: &str = "applyPatchesFromManager";
pub const FINISH_APPLYING_ACTION: &str = "finishApplyingPatchesFromManager";
pub const APPLY_SNAPSHOT_ACTION: &str = "applySharedModelSnapshotFromManager";
pub const SHARED_MODEL_SYNC_ACTION: &str = "handleSharedModelChanges";

/// Manager-side API consumed by trees
pub trait TreeHost {
    /// Open a history entry for a user action. The exchange is closed by the
    /// matching `add_tree_patch_record`.
    fn add_history_entry(
        &self,
        entry_id: &str,
        exchange_id: &str,
        tree_id: &str,
        action: &str,
        undoable: bool,
    ) -> Result<(), HistoryError>;

    /// Keep an entry open while the tree does more work for it
    fn start_exchange(&self, entry_id: &str, exchange_id: &str, name: &str)
        -> Result<(), HistoryError>;

    /// Record a tree's changes and close the exchange. Sent even when there
    /// are no patches.
    fn add_tree_patch_record(
        &self,
        entry_id: &str,
        exchange_id: &str,
        record: TreeRecordEntry,
    ) -> Result<(), HistoryError>;

    /// Push a shared model snapshot to every other tree using it. Resolves
    /// once all of them have applied it or timed out.
    fn update_shared_model<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        source_tree_id: &'a str,
        snapshot: Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>>;
}

/// Tree-side API consumed by the manager
///
/// Every call is made inside an exchange the manager opened; the tree closes
/// it by sending a record for the same `(entry_id, exchange_id)`.
pub trait TreeClient {
    fn tree_id(&self) -> &str;

    fn references_shared_model(&self, shared_model_id: &str) -> bool;

    fn apply_shared_model_snapshot_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        snapshot: &'a Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>>;

    fn start_applying_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>>;

    fn apply_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        patches: &'a [JsonPatch],
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>>;

    fn finish_applying_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>>;
}

/// Shared model hooks supplied by a concrete tree
pub trait TreeBehavior {
    /// Tiles whose derived state depends on the shared model
    fn dependent_tiles(&self, state: &Value, shared_model_id: &str) -> Vec<String> {
        document::shared_model_tiles(state, shared_model_id)
    }

    /// Recompute one tile after a shared model it references changed
    fn update_tile_after_shared_model_changes(
        &self,
        _state: &mut Value,
        _tile_id: &str,
    ) -> Result<(), HistoryError> {
        Ok(())
    }

    /// Recompute every tile that references a shared model
    fn update_tree_after_shared_model_changes(&self, state: &mut Value) -> Result<(), HistoryError> {
        let tiles: BTreeSet<String> = document::shared_model_ids(state)
            .iter()
            .flat_map(|id| self.dependent_tiles(state, id))
            .collect();

        for tile_id in tiles {
            self.update_tile_after_shared_model_changes(state, &tile_id)?;
        }
        Ok(())
    }

    /// Replace this tree's copy of a shared model with a snapshot from
    /// another tree
    fn apply_shared_model_snapshot(
        &self,
        _state: &mut Value,
        _snapshot: &Value,
    ) -> Result<(), HistoryError> {
        Err(HistoryError::not_implemented("apply_shared_model_snapshot"))
    }
}

/// Tree without any shared model handling of its own
#[derive(Debug, Default)]
pub struct PlainBehavior;

impl TreeBehavior for PlainBehavior {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeMode {
    /// Mutations are user driven and trigger shared model syncing
    Organic,
    /// The manager is pushing patches; tile recomputes are suppressed
    ApplyingManagerPatches,
}

/// A monitored state tree
pub struct Tree {
    pub(crate) tree_id: String,
    pub(crate) state: RefCell<Value>,
    pub(crate) mode: Cell<TreeMode>,
    pub(crate) behavior: Box<dyn TreeBehavior>,
    host: Weak<dyn TreeHost>,
}

impl Tree {
    pub fn new(
        tree_id: impl Into<String>,
        state: Value,
        behavior: impl TreeBehavior + 'static,
        host: Weak<dyn TreeHost>,
    ) -> Rc<Self> {
        Rc::new(Self {
            tree_id: tree_id.into(),
            state: RefCell::new(state),
            mode: Cell::new(TreeMode::Organic),
            behavior: Box::new(behavior),
            host,
        })
    }

    /// Tree that is not connected to any manager; its changes are not recorded
    pub fn detached(
        tree_id: impl Into<String>,
        state: Value,
        behavior: impl TreeBehavior + 'static,
    ) -> Rc<Self> {
        let host: Weak<dyn TreeHost> = Weak::<crate::TreeManager>::new();
        Self::new(tree_id, state, behavior, host)
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    /// Borrow the current state. Do not hold across an `.await`.
    pub fn state(&self) -> Ref<'_, Value> {
        self.state.borrow()
    }

    pub fn snapshot(&self) -> Value {
        self.state.borrow().clone()
    }

    /// Value at a JSON pointer, if present
    pub fn get(&self, pointer: &str) -> Option<Value> {
        self.state.borrow().pointer(pointer).cloned()
    }

    pub fn mode(&self) -> TreeMode {
        self.mode.get()
    }

    pub fn is_applying_manager_patches(&self) -> bool {
        self.mode.get() == TreeMode::ApplyingManagerPatches
    }

    pub(crate) fn host(&self) -> Option<Rc<dyn TreeHost>> {
        self.host.upgrade()
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("tree_id", &self.tree_id)
            .field("mode", &self.mode.get())
            .field("state", &self.state.borrow())
            .finish()
    }
}

impl TreeClient for Tree {
    fn tree_id(&self) -> &str {
        &self.tree_id
    }

    fn references_shared_model(&self, shared_model_id: &str) -> bool {
        document::shared_model_entry(&self.state.borrow(), shared_model_id).is_some()
    }

    fn apply_shared_model_snapshot_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        snapshot: &'a Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            let call = ActionCall::from_manager(
                APPLY_SNAPSHOT_ACTION,
                entry_id,
                exchange_id,
                CallKind::SharedModelSnapshot,
            );
            let behavior = &self.behavior;
            self.record_action(call, |state| {
                behavior
                    .apply_shared_model_snapshot(state, snapshot)
                    .map_err(|err| err.for_tree(&self.tree_id))
            })
            .await
            .map(|_| ())
        }
        .boxed_local()
    }

    fn start_applying_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            self.mode.set(TreeMode::ApplyingManagerPatches);
            let call = ActionCall::from_manager(
                START_APPLYING_ACTION,
                entry_id,
                exchange_id,
                CallKind::ManagerPatches,
            );
            self.record_action(call, |_| Ok(())).await.map(|_| ())
        }
        .boxed_local()
    }

    fn apply_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        patches: &'a [JsonPatch],
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            let call = ActionCall::from_manager(
                APPLY_PATCHES_ACTION,
                entry_id,
                exchange_id,
                CallKind::ManagerPatches,
            );
            self.record_action(call, |state| Ok(apply_patches(state, patches)?))
                .await
                .map(|_| ())
        }
        .boxed_local()
    }

    fn finish_applying_patches_from_manager<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            self.mode.set(TreeMode::Organic);
            let call = ActionCall::from_manager(
                FINISH_APPLYING_ACTION,
                entry_id,
                exchange_id,
                CallKind::ManagerPatches,
            );
            let behavior = &self.behavior;
            let changed = self
                .record_action(call, |state| behavior.update_tree_after_shared_model_changes(state))
                .await?;

            // The applied patches should already contain every derived change.
            // Anything left means an edit raced the patch application or a tile
            // recompute is not deterministic.
            if changed {
                warn!(
                    tree_id = %self.tree_id,
                    entry_id,
                    "Tree changed while resyncing after manager patches"
                );
            }
            Ok(())
        }
        .boxed_local()
    }
}
