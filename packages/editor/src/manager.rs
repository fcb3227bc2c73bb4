//! # Tree Manager
//!
//! Owns the history log and coordinates every tree attached to a document.
//!
//! ## Entries and exchanges
//!
//! A history entry stays `recording` while any exchange on it is open. Trees
//! open the first exchange when they start a user action; the manager opens
//! one for every call it makes into a tree. Each exchange is closed by the
//! tree's record for it, or forcibly when the call errors or times out.
//!
//! Completed entries are committed in the order they were opened, so an
//! entry that finishes early waits for the ones started before it.
//!
//! Top-level actions are not held back while an earlier entry is still
//! recording. Each entry collects its own records independently and only the
//! commit is serialized, which gives the same history as starting entries one
//! at a time as long as actions on different entries touch disjoint state.
//!
//! ## Replay
//!
//! Calls made with [`REPLAY_ENTRY_ID`] are never recorded: the manager
//! ignores entries, exchanges and records carrying it.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use futures::future::{join_all, FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::history::{new_id, ChangeDocument, EntryState, HistoryEntry, TreeRecordEntry};
use crate::patch::JsonPatch;
use crate::tree::{Tree, TreeBehavior, TreeClient, TreeHost};
use crate::undo_store::UndoStore;
use crate::HistoryError;

/// Entry id used while replaying or navigating history
pub const REPLAY_ENTRY_ID: &str = "REPLAY_HISTORY_ENTRY";

/// A manager call into a tree
#[derive(Debug, Clone, Copy)]
pub(crate) enum TreeCall<'a> {
    Start,
    Apply(&'a [JsonPatch]),
    Finish,
    Snapshot(&'a Value),
}

impl TreeCall<'_> {
    fn name(&self) -> &'static str {
        match self {
            TreeCall::Start => crate::tree::START_APPLYING_ACTION,
            TreeCall::Apply(_) => crate::tree::APPLY_PATCHES_ACTION,
            TreeCall::Finish => crate::tree::FINISH_APPLYING_ACTION,
            TreeCall::Snapshot(_) => crate::tree::APPLY_SNAPSHOT_ACTION,
        }
    }
}

pub(crate) struct ManagerState {
    pub trees: BTreeMap<String, Rc<dyn TreeClient>>,
    pub document: ChangeDocument,
    /// Entries still recording, or complete but waiting on an older one
    pub active_entries: Vec<HistoryEntry>,
    pub undo_store: UndoStore,
    pub current_history_index: usize,
}

/// Coordinates history recording, undo/redo and replay across trees
pub struct TreeManager {
    config: ManagerConfig,
    pub(crate) state: RefCell<ManagerState>,
}

impl TreeManager {
    pub fn new(config: ManagerConfig) -> Rc<Self> {
        let undo_store = UndoStore::with_max_levels(config.max_undo_levels);
        Rc::new(Self {
            config,
            state: RefCell::new(ManagerState {
                trees: BTreeMap::new(),
                document: ChangeDocument::default(),
                active_entries: Vec::new(),
                undo_store,
                current_history_index: 0,
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Handle given to trees at construction
    pub fn host(self: &Rc<Self>) -> Weak<dyn TreeHost> {
        let weak: Weak<TreeManager> = Rc::downgrade(self);
        weak
    }

    /// Create a tree connected to this manager and register it
    pub fn attach_tree(
        self: &Rc<Self>,
        tree_id: impl Into<String>,
        state: Value,
        behavior: impl TreeBehavior + 'static,
    ) -> Rc<Tree> {
        let tree = Tree::new(tree_id, state, behavior, self.host());
        self.put_tree(tree.clone());
        tree
    }

    /// Register a tree under its own id, replacing any previous one
    pub fn put_tree(&self, tree: Rc<dyn TreeClient>) {
        let tree_id = tree.tree_id().to_string();
        debug!(tree_id = %tree_id, "Registering tree");
        if self.state.borrow_mut().trees.insert(tree_id.clone(), tree).is_some() {
            warn!(tree_id = %tree_id, "Replaced an existing tree with the same id");
        }
    }

    pub fn remove_tree(&self, tree_id: &str) -> Option<Rc<dyn TreeClient>> {
        self.state.borrow_mut().trees.remove(tree_id)
    }

    pub fn tree(&self, tree_id: &str) -> Option<Rc<dyn TreeClient>> {
        self.state.borrow().trees.get(tree_id).cloned()
    }

    pub fn tree_ids(&self) -> Vec<String> {
        self.state.borrow().trees.keys().cloned().collect()
    }

    pub(crate) fn trees(&self) -> Vec<Rc<dyn TreeClient>> {
        self.state.borrow().trees.values().cloned().collect()
    }

    /// Replace the history log. Trees are left as they are; call
    /// [`TreeManager::replay_history_to_trees`] to bring them in line.
    pub fn set_change_document(&self, document: ChangeDocument) {
        let mut state = self.state.borrow_mut();
        info!(entries = document.len(), "Loading change document");
        state.document = document;
        state.undo_store.clear();
        state.current_history_index = 0;
    }

    pub fn change_document(&self) -> Ref<'_, ChangeDocument> {
        Ref::map(self.state.borrow(), |state| &state.document)
    }

    pub fn history_len(&self) -> usize {
        self.state.borrow().document.len()
    }

    pub fn history_entry(&self, index: usize) -> Option<HistoryEntry> {
        self.state.borrow().document.history.get(index).cloned()
    }

    pub fn undo_store(&self) -> Ref<'_, UndoStore> {
        Ref::map(self.state.borrow(), |state| &state.undo_store)
    }

    /// Number of history entries reflected in the trees
    pub fn current_history_index(&self) -> usize {
        self.state.borrow().current_history_index
    }

    /// True while any entry is still recording or waiting to be committed
    pub fn has_active_entries(&self) -> bool {
        !self.state.borrow().active_entries.is_empty()
    }

    /// Open a new entry with its first exchange
    pub(crate) fn create_entry(
        &self,
        entry_id: &str,
        exchange_id: &str,
        action: &str,
        tree_id: &str,
        undoable: bool,
    ) -> Result<(), HistoryError> {
        let mut state = self.state.borrow_mut();
        let exists = state.active_entries.iter().any(|entry| entry.id == entry_id)
            || state.document.find(entry_id).is_some();
        if exists {
            return Err(HistoryError::EntryExists(entry_id.to_string()));
        }

        let undoable = undoable && !self.config.is_no_undo_action(action);
        let mut entry = HistoryEntry::new(entry_id, action, tree_id, undoable);
        entry
            .active_exchanges
            .insert(exchange_id.to_string(), action.to_string());

        debug!(entry_id, tree_id, action, undoable, "Opened history entry");
        state.active_entries.push(entry);
        Ok(())
    }

    fn open_exchange(&self, entry_id: &str, exchange_id: &str, name: &str) -> Result<(), HistoryError> {
        let mut state = self.state.borrow_mut();
        let entry = active_entry(&mut state, entry_id)?;
        if entry.is_complete() {
            return Err(HistoryError::EntryComplete(entry_id.to_string()));
        }
        if entry.active_exchanges.contains_key(exchange_id) {
            return Err(HistoryError::ExchangeOpen {
                entry_id: entry_id.to_string(),
                exchange_id: exchange_id.to_string(),
            });
        }
        entry
            .active_exchanges
            .insert(exchange_id.to_string(), name.to_string());
        Ok(())
    }

    /// Close an exchange; a closed or unknown one is an error
    pub(crate) fn end_exchange(&self, entry_id: &str, exchange_id: &str) -> Result<(), HistoryError> {
        let mut state = self.state.borrow_mut();
        let entry = active_entry(&mut state, entry_id)?;
        if entry.active_exchanges.remove(exchange_id).is_none() {
            return Err(HistoryError::ExchangeNotFound {
                entry_id: entry_id.to_string(),
                exchange_id: exchange_id.to_string(),
            });
        }
        if entry.active_exchanges.is_empty() {
            entry.state = EntryState::Complete;
        }
        commit_completed_entries(&mut state);
        Ok(())
    }

    /// Close an exchange whose tree never answered
    fn abandon_exchange(&self, entry_id: &str, exchange_id: &str) {
        if entry_id == REPLAY_ENTRY_ID {
            return;
        }

        let still_open = self
            .state
            .borrow()
            .active_entries
            .iter()
            .any(|entry| entry.id == entry_id && entry.active_exchanges.contains_key(exchange_id));
        if still_open {
            warn!(entry_id, exchange_id, "Closing exchange the tree never finished");
            if let Err(err) = self.end_exchange(entry_id, exchange_id) {
                warn!(entry_id, error = %err, "Failed to close abandoned exchange");
            }
        }
    }

    /// Call into a tree inside a fresh exchange, bounded by the configured
    /// timeout
    ///
    /// Only integration errors are returned. Anything else is logged and the
    /// exchange is closed so the entry can still complete.
    pub(crate) async fn call_tree(
        &self,
        entry_id: &str,
        tree: &Rc<dyn TreeClient>,
        call: TreeCall<'_>,
    ) -> Result<(), HistoryError> {
        let exchange_id = new_id();
        if entry_id != REPLAY_ENTRY_ID {
            self.open_exchange(entry_id, &exchange_id, call.name())?;
        }

        let pending = match call {
            TreeCall::Start => tree.start_applying_patches_from_manager(entry_id, &exchange_id),
            TreeCall::Apply(patches) => tree.apply_patches_from_manager(entry_id, &exchange_id, patches),
            TreeCall::Finish => tree.finish_applying_patches_from_manager(entry_id, &exchange_id),
            TreeCall::Snapshot(snapshot) => {
                tree.apply_shared_model_snapshot_from_manager(entry_id, &exchange_id, snapshot)
            }
        };

        let result = match tokio::time::timeout(self.config.exchange_timeout(), pending).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_integration() => Err(err),
            Ok(Err(err)) => {
                warn!(
                    tree_id = %tree.tree_id(),
                    call = call.name(),
                    error = %err,
                    "Tree call failed"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    tree_id = %tree.tree_id(),
                    call = call.name(),
                    timeout_ms = self.config.exchange_timeout_ms,
                    "Tree call timed out"
                );
                Ok(())
            }
        };

        self.abandon_exchange(entry_id, &exchange_id);
        result
    }
}

fn active_entry<'a>(
    state: &'a mut ManagerState,
    entry_id: &str,
) -> Result<&'a mut HistoryEntry, HistoryError> {
    state
        .active_entries
        .iter_mut()
        .find(|entry| entry.id == entry_id)
        .ok_or_else(|| HistoryError::EntryNotFound(entry_id.to_string()))
}

/// Move completed entries at the front of the queue into the history log
fn commit_completed_entries(state: &mut ManagerState) {
    while state
        .active_entries
        .first()
        .is_some_and(HistoryEntry::is_complete)
    {
        let entry = state.active_entries.remove(0);
        if entry.records.is_empty() {
            debug!(entry_id = %entry.id, action = %entry.action, "Discarding entry without changes");
            continue;
        }

        let undoable = entry.undoable;
        debug!(entry_id = %entry.id, action = %entry.action, records = entry.records.len(), "Committed history entry");
        state.document.history.push(entry);

        let index = state.document.history.len() - 1;
        state.current_history_index = state.document.history.len();
        if undoable {
            state.undo_store.add_history_entry(index);
        }
    }
}

impl TreeHost for TreeManager {
    fn add_history_entry(
        &self,
        entry_id: &str,
        exchange_id: &str,
        tree_id: &str,
        action: &str,
        undoable: bool,
    ) -> Result<(), HistoryError> {
        if entry_id == REPLAY_ENTRY_ID {
            return Ok(());
        }
        self.create_entry(entry_id, exchange_id, action, tree_id, undoable)
    }

    fn start_exchange(&self, entry_id: &str, exchange_id: &str, name: &str) -> Result<(), HistoryError> {
        if entry_id == REPLAY_ENTRY_ID {
            return Ok(());
        }
        self.open_exchange(entry_id, exchange_id, name)
    }

    fn add_tree_patch_record(
        &self,
        entry_id: &str,
        exchange_id: &str,
        record: TreeRecordEntry,
    ) -> Result<(), HistoryError> {
        if entry_id == REPLAY_ENTRY_ID {
            return Ok(());
        }

        {
            let mut state = self.state.borrow_mut();
            let entry = active_entry(&mut state, entry_id)?;
            if entry.is_complete() {
                return Err(HistoryError::EntryComplete(entry_id.to_string()));
            }
            if !record.patches.is_empty() {
                entry.records.push(record);
            }
        }
        self.end_exchange(entry_id, exchange_id)
    }

    fn update_shared_model<'a>(
        &'a self,
        entry_id: &'a str,
        exchange_id: &'a str,
        source_tree_id: &'a str,
        snapshot: Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            let Some(shared_model_id) = snapshot.get("id").and_then(Value::as_str) else {
                warn!("Shared model snapshot has no id, not propagating");
                return Ok(());
            };

            let targets: Vec<Rc<dyn TreeClient>> = self
                .trees()
                .into_iter()
                .filter(|tree| {
                    tree.tree_id() != source_tree_id && tree.references_shared_model(shared_model_id)
                })
                .collect();

            debug!(
                shared_model_id,
                source_tree_id,
                exchange_id,
                targets = targets.len(),
                "Propagating shared model"
            );

            let calls = targets
                .iter()
                .map(|tree| self.call_tree(entry_id, tree, TreeCall::Snapshot(&snapshot)));
            join_all(calls).await.into_iter().collect()
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryOperation;
    use serde_json::json;

    fn record(tree: &str, path: &str) -> TreeRecordEntry {
        TreeRecordEntry {
            tree: tree.to_string(),
            action: "/set".to_string(),
            patches: vec![JsonPatch::replace(path, json!(1))],
            inverse_patches: vec![JsonPatch::replace(path, json!(0))],
        }
    }

    #[test]
    fn test_entry_completes_when_exchanges_close() {
        let manager = TreeManager::new(ManagerConfig::default());

        manager.add_history_entry("e1", "x1", "t1", "/set", true).unwrap();
        manager.start_exchange("e1", "x2", "handleSharedModelChanges").unwrap();
        manager.add_tree_patch_record("e1", "x2", record("t1", "/a")).unwrap();
        assert_eq!(manager.history_len(), 0);
        assert!(manager.has_active_entries());

        manager.add_tree_patch_record("e1", "x1", record("t1", "/b")).unwrap();
        assert_eq!(manager.history_len(), 1);
        assert!(!manager.has_active_entries());

        let entry = manager.history_entry(0).unwrap();
        assert!(entry.is_complete());
        assert_eq!(entry.records.len(), 2);
        assert_eq!(entry.records_for(HistoryOperation::Redo)[0].patches[0].path, "/a");
        assert!(manager.undo_store().can_undo());
    }

    #[test]
    fn test_entries_commit_in_open_order() {
        let manager = TreeManager::new(ManagerConfig::default());

        manager.add_history_entry("first", "x1", "t1", "/one", true).unwrap();
        manager.add_history_entry("second", "x2", "t1", "/two", true).unwrap();

        manager.add_tree_patch_record("second", "x2", record("t1", "/b")).unwrap();
        assert_eq!(manager.history_len(), 0);

        manager.add_tree_patch_record("first", "x1", record("t1", "/a")).unwrap();
        assert_eq!(manager.history_len(), 2);
        assert_eq!(manager.history_entry(0).unwrap().id, "first");
        assert_eq!(manager.history_entry(1).unwrap().id, "second");
    }

    #[test]
    fn test_protocol_errors() {
        let manager = TreeManager::new(ManagerConfig::default());

        assert!(matches!(
            manager.start_exchange("missing", "x", "name"),
            Err(HistoryError::EntryNotFound(_))
        ));

        manager.add_history_entry("e1", "x1", "t1", "/set", true).unwrap();
        assert!(matches!(
            manager.add_history_entry("e1", "x9", "t1", "/set", true),
            Err(HistoryError::EntryExists(_))
        ));
        assert!(matches!(
            manager.start_exchange("e1", "x1", "again"),
            Err(HistoryError::ExchangeOpen { .. })
        ));
        assert!(matches!(
            manager.add_tree_patch_record("e1", "nope", record("t1", "/a")),
            Err(HistoryError::ExchangeNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_entries_are_discarded() {
        let manager = TreeManager::new(ManagerConfig::default());

        manager.add_history_entry("e1", "x1", "t1", "/noop", true).unwrap();
        let empty = TreeRecordEntry {
            tree: "t1".to_string(),
            action: "/noop".to_string(),
            patches: vec![],
            inverse_patches: vec![],
        };
        manager.add_tree_patch_record("e1", "x1", empty).unwrap();

        assert_eq!(manager.history_len(), 0);
        assert!(!manager.has_active_entries());
        assert!(!manager.undo_store().can_undo());
    }

    #[test]
    fn test_replay_entry_is_never_recorded() {
        let manager = TreeManager::new(ManagerConfig::default());

        manager
            .add_history_entry(REPLAY_ENTRY_ID, "x1", "t1", "/set", true)
            .unwrap();
        manager.start_exchange(REPLAY_ENTRY_ID, "x2", "apply").unwrap();
        manager
            .add_tree_patch_record(REPLAY_ENTRY_ID, "x2", record("t1", "/a"))
            .unwrap();

        assert_eq!(manager.history_len(), 0);
        assert!(!manager.has_active_entries());
    }

    #[test]
    fn test_no_undo_actions_from_config() {
        let config = ManagerConfig::default().with_no_undo_action("/select");
        let manager = TreeManager::new(config);

        manager.add_history_entry("e1", "x1", "t1", "/select", true).unwrap();
        manager.add_tree_patch_record("e1", "x1", record("t1", "/a")).unwrap();

        let entry = manager.history_entry(0).unwrap();
        assert!(!entry.undoable);
        assert!(!manager.undo_store().can_undo());
    }
}
