//! # Replay
//!
//! Rebuild tree state from a change document, or move the trees to any point
//! in its history.
//!
//! Every attached tree is bracketed once by start/finish for the whole run,
//! so tile recomputes happen a single time on the final state instead of on
//! each intermediate one. Nothing done here is recorded.

use std::rc::Rc;

use tracing::{debug, info, instrument, warn};

use crate::history::{HistoryEntry, HistoryOperation};
use crate::manager::{TreeCall, TreeManager, REPLAY_ENTRY_ID};
use crate::tree::TreeClient;
use crate::HistoryError;

impl TreeManager {
    /// Apply every history entry to the attached trees, in log order
    #[instrument(skip(self))]
    pub async fn replay_history_to_trees(&self) -> Result<(), HistoryError> {
        let history = self.change_document().history.clone();
        info!(entries = history.len(), "Replaying history");

        self.play(&history, HistoryOperation::Redo).await?;
        self.state.borrow_mut().current_history_index = history.len();
        Ok(())
    }

    /// Move the trees so they reflect the first `index` history entries
    #[instrument(skip(self))]
    pub async fn go_to_history_entry(&self, index: usize) -> Result<(), HistoryError> {
        let (current, history) = {
            let state = self.state.borrow();
            (state.current_history_index, state.document.history.clone())
        };
        if index > history.len() {
            return Err(HistoryError::IndexOutOfRange {
                index,
                len: history.len(),
            });
        }
        if index == current {
            debug!(index, "Already at history entry");
            return Ok(());
        }

        let (entries, op): (Vec<HistoryEntry>, HistoryOperation) = if index > current {
            (history[current..index].to_vec(), HistoryOperation::Redo)
        } else {
            (
                history[index..current].iter().rev().cloned().collect(),
                HistoryOperation::Undo,
            )
        };

        info!(from = current, to = index, "Moving through history");
        self.play(&entries, op).await?;
        self.state.borrow_mut().current_history_index = index;
        Ok(())
    }

    async fn play(&self, entries: &[HistoryEntry], op: HistoryOperation) -> Result<(), HistoryError> {
        let trees: Vec<Rc<dyn TreeClient>> = self.trees();

        for tree in &trees {
            self.call_tree(REPLAY_ENTRY_ID, tree, TreeCall::Start).await?;
        }

        for entry in entries {
            if !entry.is_complete() {
                warn!(entry_id = %entry.id, "Replaying an entry that never completed");
            }
            for record in entry.records_for(op) {
                let Some(tree) = self.tree(&record.tree) else {
                    warn!(tree_id = %record.tree, entry_id = %entry.id, "Skipping record for missing tree");
                    continue;
                };
                let patches = record.patches_for(op);
                self.call_tree(REPLAY_ENTRY_ID, &tree, TreeCall::Apply(&patches)).await?;
            }
        }

        for tree in &trees {
            self.call_tree(REPLAY_ENTRY_ID, tree, TreeCall::Finish).await?;
        }
        Ok(())
    }
}
