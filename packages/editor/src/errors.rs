//! Error types for the history engine

use thiserror::Error;

use crate::patch::PatchError;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A concrete tree never provided an override the manager relies on.
    #[error("Tree {tree_id} does not implement {method}")]
    Integration { tree_id: String, method: &'static str },

    #[error("History entry already exists: {0}")]
    EntryExists(String),

    #[error("No active history entry: {0}")]
    EntryNotFound(String),

    #[error("History entry {0} was already marked complete")]
    EntryComplete(String),

    #[error("Exchange {exchange_id} is already open on entry {entry_id}")]
    ExchangeOpen { entry_id: String, exchange_id: String },

    #[error("No active exchange {exchange_id} on entry {entry_id}")]
    ExchangeNotFound { entry_id: String, exchange_id: String },

    #[error("Unknown tree: {0}")]
    UnknownTree(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("History index {index} is out of range (history has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// A tile or tree action rejected the change.
    #[error("Action failed: {0}")]
    Action(String),
}

impl HistoryError {
    pub fn action(message: impl Into<String>) -> Self {
        HistoryError::Action(message.into())
    }

    /// Missing override; the owning tree fills in its id via [`HistoryError::for_tree`]
    pub fn not_implemented(method: &'static str) -> Self {
        HistoryError::Integration {
            tree_id: String::new(),
            method,
        }
    }

    pub(crate) fn for_tree(self, tree_id: &str) -> Self {
        match self {
            HistoryError::Integration {
                tree_id: current,
                method,
            } if current.is_empty() => HistoryError::Integration {
                tree_id: tree_id.to_string(),
                method,
            },
            other => other,
        }
    }

    /// Wiring bugs surface to the caller; everything else degrades to a warning.
    pub fn is_integration(&self) -> bool {
        matches!(self, HistoryError::Integration { .. })
    }
}
