//! # Undo Store
//!
//! Linear undo/redo over the history log.
//!
//! ## Design
//!
//! - The store holds indices of undoable entries in the history log, plus a
//!   cursor. Everything before the cursor can be undone, everything after it
//!   can be redone.
//! - A new undoable entry drops the redo tail.
//! - Undo and redo are themselves recorded as history entries (tree
//!   `manager`, not undoable), so the log stays a complete account of every
//!   change made to the trees.
//! - The cursor moves before the trees are touched; a failed tree call is
//!   logged and does not roll the cursor back.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::{debug, info, instrument, warn};

use crate::history::{new_id, HistoryEntry, HistoryOperation, MANAGER_TREE_ID};
use crate::manager::{TreeCall, TreeManager};
use crate::tree::TreeClient;
use crate::HistoryError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoStore {
    /// History log indices, oldest first
    entries: Vec<usize>,

    /// Position between undoable and redoable entries
    undo_idx: usize,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,
}

impl UndoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            max_levels,
            ..Self::default()
        }
    }

    /// Track a newly committed undoable entry
    pub fn add_history_entry(&mut self, history_index: usize) {
        if self.entries.contains(&history_index) {
            return;
        }

        self.entries.truncate(self.undo_idx);
        self.entries.push(history_index);

        if self.max_levels > 0 && self.entries.len() > self.max_levels {
            let excess = self.entries.len() - self.max_levels;
            self.entries.drain(..excess);
        }
        self.undo_idx = self.entries.len();
    }

    pub fn can_undo(&self) -> bool {
        self.undo_idx > 0
    }

    pub fn can_redo(&self) -> bool {
        self.undo_idx < self.entries.len()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_idx
    }

    pub fn redo_levels(&self) -> usize {
        self.entries.len() - self.undo_idx
    }

    /// History index that the next undo reverts
    pub fn entry_to_undo(&self) -> Option<usize> {
        self.undo_idx.checked_sub(1).map(|idx| self.entries[idx])
    }

    /// History index that the next redo re-applies
    pub fn entry_to_redo(&self) -> Option<usize> {
        self.entries.get(self.undo_idx).copied()
    }

    fn step_back(&mut self) -> Option<usize> {
        let index = self.entry_to_undo()?;
        self.undo_idx -= 1;
        Some(index)
    }

    fn step_forward(&mut self) -> Option<usize> {
        let index = self.entry_to_redo()?;
        self.undo_idx += 1;
        Some(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.undo_idx = 0;
    }
}

impl TreeManager {
    pub fn can_undo(&self) -> bool {
        self.state.borrow().undo_store.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.state.borrow().undo_store.can_redo()
    }

    /// Revert the most recent undoable entry
    #[instrument(skip(self))]
    pub async fn undo(&self) -> Result<(), HistoryError> {
        let entry = {
            let mut state = self.state.borrow_mut();
            let index = state.undo_store.step_back().ok_or(HistoryError::NothingToUndo)?;
            state.document.history.get(index).cloned()
        };
        let entry = entry.ok_or(HistoryError::NothingToUndo)?;

        info!(entry_id = %entry.id, action = %entry.action, "Undo");
        self.apply_history_operation(&entry, HistoryOperation::Undo).await
    }

    /// Re-apply the most recently undone entry
    #[instrument(skip(self))]
    pub async fn redo(&self) -> Result<(), HistoryError> {
        let entry = {
            let mut state = self.state.borrow_mut();
            let index = state.undo_store.step_forward().ok_or(HistoryError::NothingToRedo)?;
            state.document.history.get(index).cloned()
        };
        let entry = entry.ok_or(HistoryError::NothingToRedo)?;

        info!(entry_id = %entry.id, action = %entry.action, "Redo");
        self.apply_history_operation(&entry, HistoryOperation::Redo).await
    }

    /// Send an entry's patches to its trees, recording a new entry for it
    async fn apply_history_operation(
        &self,
        entry: &HistoryEntry,
        op: HistoryOperation,
    ) -> Result<(), HistoryError> {
        let entry_id = new_id();
        let exchange_id = new_id();
        self.create_entry(&entry_id, &exchange_id, op.action_name(), MANAGER_TREE_ID, false)?;

        let result = self.send_records(&entry_id, entry, op).await;

        self.end_exchange(&entry_id, &exchange_id)?;
        result
    }

    async fn send_records(
        &self,
        entry_id: &str,
        entry: &HistoryEntry,
        op: HistoryOperation,
    ) -> Result<(), HistoryError> {
        let records = entry.records_for(op);
        let trees = self.trees_for(records.iter().map(|record| record.tree.as_str()));

        for tree in &trees {
            self.call_tree(entry_id, tree, TreeCall::Start).await?;
        }

        for record in &records {
            let Some(tree) = self.tree(&record.tree) else {
                continue;
            };
            let patches = record.patches_for(op);
            debug!(tree_id = %record.tree, patches = patches.len(), "Applying history record");
            self.call_tree(entry_id, &tree, TreeCall::Apply(&patches)).await?;
        }

        for tree in &trees {
            self.call_tree(entry_id, tree, TreeCall::Finish).await?;
        }
        Ok(())
    }

    /// Distinct attached trees in first-use order; missing ones are skipped
    pub(crate) fn trees_for<'a>(
        &self,
        tree_ids: impl Iterator<Item = &'a str>,
    ) -> Vec<Rc<dyn TreeClient>> {
        let mut seen = BTreeSet::new();
        let mut trees = Vec::new();
        for tree_id in tree_ids {
            if !seen.insert(tree_id) {
                continue;
            }
            match self.tree(tree_id) {
                Some(tree) => trees.push(tree),
                None => warn!(tree_id, "History references a tree that is not attached"),
            }
        }
        trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_cursor() {
        let mut store = UndoStore::new();
        assert!(!store.can_undo());
        assert!(!store.can_redo());

        store.add_history_entry(0);
        store.add_history_entry(1);
        assert_eq!(store.undo_levels(), 2);

        assert_eq!(store.step_back(), Some(1));
        assert_eq!(store.entry_to_redo(), Some(1));
        assert!(store.can_redo());

        assert_eq!(store.step_forward(), Some(1));
        assert_eq!(store.step_forward(), None);
    }

    #[test]
    fn test_new_entry_drops_redo_tail() {
        let mut store = UndoStore::new();
        store.add_history_entry(0);
        store.add_history_entry(1);
        store.step_back();

        store.add_history_entry(3);
        assert!(!store.can_redo());
        assert_eq!(store.entry_to_undo(), Some(3));
        assert_eq!(store.undo_levels(), 2);
    }

    #[test]
    fn test_max_levels() {
        let mut store = UndoStore::with_max_levels(2);
        for index in 0..5 {
            store.add_history_entry(index);
        }

        assert_eq!(store.undo_levels(), 2);
        assert_eq!(store.step_back(), Some(4));
        assert_eq!(store.step_back(), Some(3));
        assert_eq!(store.step_back(), None);
    }
}
