//! # Tree Monitor
//!
//! Wraps every mutation of a [`Tree`] and reports it to the manager:
//!
//! 1. Snapshot the state, run the mutation, diff the two snapshots.
//! 2. For a user action, open a history entry.
//! 3. For each shared model the patches touched:
//!    - push its new snapshot to the other trees (skipped for snapshot echoes)
//!    - recompute every dependent tile in its own exchange (skipped while the
//!      manager is applying patches to this tree)
//! 4. Send the tree's record, closing the action's exchange.
//!
//! A failed mutation leaves the state untouched.

use std::collections::BTreeSet;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::document::{self, SHARED_MODEL_MAP};
use crate::history::{new_id, TreeRecordEntry};
use crate::patch::{diff, Diff, JsonPatch};
use crate::tree::{Tree, TreeHost, SHARED_MODEL_SYNC_ACTION};
use crate::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// Called by user code
    Organic,
    /// Dependent tile recompute after a shared model change
    SharedModelSync,
    /// A shared model snapshot coming from another tree
    SharedModelSnapshot,
    /// Undo, redo or replay patches and their bracketing calls
    ManagerPatches,
}

/// Identity of one monitored action
#[derive(Debug, Clone)]
pub(crate) struct ActionCall {
    pub name: String,
    pub entry_id: String,
    pub exchange_id: String,
    pub undoable: bool,
    pub kind: CallKind,
}

impl ActionCall {
    pub fn organic(name: impl Into<String>, undoable: bool) -> Self {
        Self {
            name: name.into(),
            entry_id: new_id(),
            exchange_id: new_id(),
            undoable,
            kind: CallKind::Organic,
        }
    }

    pub fn from_manager(name: &str, entry_id: &str, exchange_id: &str, kind: CallKind) -> Self {
        Self {
            name: name.to_string(),
            entry_id: entry_id.to_string(),
            exchange_id: exchange_id.to_string(),
            undoable: false,
            kind,
        }
    }

    fn is_organic(&self) -> bool {
        self.kind == CallKind::Organic
    }

    /// Snapshot applications must not be pushed back out
    fn is_echo(&self) -> bool {
        self.kind == CallKind::SharedModelSnapshot
    }
}

/// Ids of the shared models touched by a set of patches
///
/// Any patch at or below `/sharedModelMap/<id>` counts, including adding or
/// removing the whole entry.
pub fn modified_shared_models(patches: &[JsonPatch]) -> BTreeSet<String> {
    patches
        .iter()
        .filter_map(|patch| patch.segments().ok())
        .filter_map(|segments| match segments.as_slice() {
            [root, id, ..] if root == SHARED_MODEL_MAP => Some(id.clone()),
            _ => None,
        })
        .collect()
}

impl Tree {
    /// Run an undoable user action
    ///
    /// `name` is the action path stored in the history entry, for example
    /// `/sharedModelMap/sm1/sharedModel/setValue`. The closure must not call
    /// back into this tree.
    pub async fn action<F>(&self, name: impl Into<String>, mutate: F) -> Result<(), HistoryError>
    where
        F: FnOnce(&mut Value) -> Result<(), HistoryError>,
    {
        self.record_action(ActionCall::organic(name, true), mutate)
            .await
            .map(|_| ())
    }

    /// Run a user action whose history entry is never undoable
    pub async fn action_without_undo<F>(
        &self,
        name: impl Into<String>,
        mutate: F,
    ) -> Result<(), HistoryError>
    where
        F: FnOnce(&mut Value) -> Result<(), HistoryError>,
    {
        self.record_action(ActionCall::organic(name, false), mutate)
            .await
            .map(|_| ())
    }

    /// Apply and record one action. Returns whether the state changed.
    #[instrument(skip_all, fields(tree_id = %self.tree_id, action = %call.name))]
    pub(crate) async fn record_action<F>(
        &self,
        call: ActionCall,
        mutate: F,
    ) -> Result<bool, HistoryError>
    where
        F: FnOnce(&mut Value) -> Result<(), HistoryError>,
    {
        let before = self.state.borrow().clone();
        let outcome = {
            let mut state = self.state.borrow_mut();
            mutate(&mut state)
        };

        if let Err(err) = outcome {
            *self.state.borrow_mut() = before;
            debug!(error = %err, "Action failed, state restored");

            // The manager is waiting on this exchange
            if !call.is_organic() {
                if let Some(host) = self.host() {
                    let record = self.record(&call, Diff::default());
                    if let Err(close_err) =
                        host.add_tree_patch_record(&call.entry_id, &call.exchange_id, record)
                    {
                        warn!(error = %close_err, "Could not close exchange after failed action");
                    }
                }
            }
            return Err(err);
        }

        let changes = {
            let after = self.state.borrow();
            diff(&before, &after)
        };
        let changed = !changes.is_empty();

        let Some(host) = self.host() else {
            if changed {
                warn!("Tree is not attached to a manager, change not recorded");
            }
            return Ok(changed);
        };

        if call.is_organic() {
            host.add_history_entry(
                &call.entry_id,
                &call.exchange_id,
                &self.tree_id,
                &call.name,
                call.undoable,
            )?;
        }

        let mut sync_result = Ok(());
        for shared_model_id in modified_shared_models(&changes.patches) {
            let handled = self
                .handle_shared_model_changes(&host, &call, &shared_model_id, &before)
                .await;
            if let Err(err) = handled {
                if sync_result.is_ok() {
                    sync_result = Err(err);
                }
            }
        }

        let record = self.record(&call, changes);
        host.add_tree_patch_record(&call.entry_id, &call.exchange_id, record)?;

        sync_result.map(|_| changed)
    }

    fn record(&self, call: &ActionCall, changes: Diff) -> TreeRecordEntry {
        TreeRecordEntry {
            tree: self.tree_id.clone(),
            action: call.name.clone(),
            patches: changes.patches,
            inverse_patches: changes.inverse_patches,
        }
    }

    /// Push a changed shared model out and recompute the tiles using it
    ///
    /// Boxed because the tile recomputes are themselves recorded actions.
    fn handle_shared_model_changes<'a>(
        &'a self,
        host: &'a Rc<dyn TreeHost>,
        call: &'a ActionCall,
        shared_model_id: &'a str,
        before: &'a Value,
    ) -> LocalBoxFuture<'a, Result<(), HistoryError>> {
        async move {
            if !call.is_echo() {
                let snapshot = self
                    .state
                    .borrow()
                    .pointer(&document::shared_model_pointer(shared_model_id))
                    .cloned();

                match snapshot {
                    Some(snapshot) => {
                        host.update_shared_model(
                            &call.entry_id,
                            &call.exchange_id,
                            &self.tree_id,
                            snapshot,
                        )
                        .await?
                    }
                    None => debug!(shared_model_id, "Shared model removed, nothing to push"),
                }
            }

            if self.is_applying_manager_patches() {
                debug!(shared_model_id, "Applying manager patches, tile updates deferred");
                return Ok(());
            }

            let tiles: BTreeSet<String> = {
                let state = self.state.borrow();
                self.behavior
                    .dependent_tiles(before, shared_model_id)
                    .into_iter()
                    .chain(self.behavior.dependent_tiles(&state, shared_model_id))
                    .collect()
            };

            for tile_id in tiles {
                let exchange_id = new_id();
                host.start_exchange(&call.entry_id, &exchange_id, SHARED_MODEL_SYNC_ACTION)?;

                let sync = ActionCall::from_manager(
                    SHARED_MODEL_SYNC_ACTION,
                    &call.entry_id,
                    &exchange_id,
                    CallKind::SharedModelSync,
                );
                let behavior = &self.behavior;
                let updated = self
                    .record_action(sync, |state| {
                        behavior.update_tile_after_shared_model_changes(state, &tile_id)
                    })
                    .await;

                match updated {
                    Ok(_) => {}
                    Err(err) if err.is_integration() => return Err(err.for_tree(&self.tree_id)),
                    Err(err) => {
                        warn!(tile_id = %tile_id, error = %err, "Tile failed to update after shared model change")
                    }
                }
            }
            Ok(())
        }
        .boxed_local()
    }
}
