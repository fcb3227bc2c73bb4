//! # History Log Model
//!
//! The persisted, append-only record of every change made to a document.
//!
//! ```text
//! ChangeDocument
//!   └─ history: [HistoryEntry]          one per top-level action
//!        └─ records: [TreeRecordEntry]  one per tree touched by the action
//!             ├─ patches
//!             └─ inversePatches
//! ```
//!
//! A `HistoryEntry` is `recording` while it still has open exchanges and is
//! only appended to the log once it is `complete`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::patch::JsonPatch;
use crate::HistoryError;

/// Tree id used for entries created by the manager itself (undo, redo)
pub const MANAGER_TREE_ID: &str = "manager";

/// Fresh id for a history entry or exchange
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One tree's contribution to a single logical operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRecordEntry {
    pub tree: String,
    pub action: String,
    #[serde(default)]
    pub patches: Vec<JsonPatch>,
    #[serde(default)]
    pub inverse_patches: Vec<JsonPatch>,
}

impl TreeRecordEntry {
    /// Patches to send to the tree for the given operation
    ///
    /// Inverse patches were recorded pairwise with the forward ones, so they
    /// are replayed back to front.
    pub fn patches_for(&self, op: HistoryOperation) -> Vec<JsonPatch> {
        match op {
            HistoryOperation::Undo => self.inverse_patches.iter().rev().cloned().collect(),
            HistoryOperation::Redo => self.patches.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Recording,
    #[default]
    Complete,
}

/// Direction in which a history entry is re-applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOperation {
    Undo,
    Redo,
}

impl HistoryOperation {
    /// Action name of the entry recording this operation
    pub fn action_name(self) -> &'static str {
        match self {
            HistoryOperation::Undo => "undo",
            HistoryOperation::Redo => "redo",
        }
    }
}

/// The atomic, replayable unit of history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub state: EntryState,
    #[serde(default = "default_undoable")]
    pub undoable: bool,
    #[serde(default)]
    pub tree: String,
    #[serde(default)]
    pub records: Vec<TreeRecordEntry>,

    /// Open exchanges (exchange id → debug name); never persisted
    #[serde(skip)]
    pub(crate) active_exchanges: BTreeMap<String, String>,
}

fn default_undoable() -> bool {
    true
}

impl HistoryEntry {
    /// Start recording a new entry
    pub fn new(
        id: impl Into<String>,
        action: impl Into<String>,
        tree: impl Into<String>,
        undoable: bool,
    ) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            created: chrono::Utc::now().timestamp_millis(),
            state: EntryState::Recording,
            undoable,
            tree: tree.into(),
            records: Vec::new(),
            active_exchanges: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == EntryState::Complete
    }

    /// Names of the exchanges still holding this entry open
    pub fn active_exchanges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.active_exchanges
            .iter()
            .map(|(id, name)| (id.as_str(), name.as_str()))
    }

    /// Records in the order they must be re-applied for `op`
    pub fn records_for(&self, op: HistoryOperation) -> Vec<&TreeRecordEntry> {
        match op {
            HistoryOperation::Undo => self.records.iter().rev().collect(),
            HistoryOperation::Redo => self.records.iter().collect(),
        }
    }
}

/// Persisted change document (`CDocument`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeDocument {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChangeDocument {
    pub fn new(history: Vec<HistoryEntry>) -> Self {
        Self { history }
    }

    pub fn from_json(json: &str) -> Result<Self, HistoryError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, HistoryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a change document from disk
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write the change document to disk
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn find(&self, entry_id: &str) -> Option<&HistoryEntry> {
        self.history.iter().find(|entry| entry.id == entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> TreeRecordEntry {
        TreeRecordEntry {
            tree: "t1".to_string(),
            action: "/tileMap/t1/content/setText".to_string(),
            patches: vec![
                JsonPatch::replace("/a", json!(1)),
                JsonPatch::replace("/b", json!(2)),
            ],
            inverse_patches: vec![
                JsonPatch::replace("/a", json!(0)),
                JsonPatch::replace("/b", json!(0)),
            ],
        }
    }

    #[test]
    fn test_undo_patches_are_reversed() {
        let record = sample_record();
        let undo = record.patches_for(HistoryOperation::Undo);
        assert_eq!(undo[0].path, "/b");
        assert_eq!(undo[1].path, "/a");

        let redo = record.patches_for(HistoryOperation::Redo);
        assert_eq!(redo, record.patches);
    }

    #[test]
    fn test_entry_snapshot_format() {
        let mut entry = HistoryEntry::new("e1", "/tileMap/t1/content/setText", "t1", true);
        entry.created = 42;
        entry.state = EntryState::Complete;
        entry.records.push(sample_record());
        entry.active_exchanges.insert("x".to_string(), "never persisted".to_string());

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["state"], json!("complete"));
        assert_eq!(value["created"], json!(42));
        assert_eq!(value["records"][0]["inversePatches"][0]["path"], json!("/a"));
        assert!(value.get("activeExchanges").is_none());
    }

    #[test]
    fn test_loads_sparse_snapshot() {
        let doc = ChangeDocument::from_json(
            r#"{ "history": [ { "id": "a1", "action": "/x" } ] }"#,
        )
        .unwrap();

        assert_eq!(doc.len(), 1);
        let entry = &doc.history[0];
        assert!(entry.is_complete());
        assert!(entry.undoable);
        assert!(entry.records.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut entry = HistoryEntry::new("e1", "/x", "t1", false);
        entry.state = EntryState::Complete;
        let doc = ChangeDocument::new(vec![entry]);
        doc.save(&path).unwrap();

        let loaded = ChangeDocument::load(&path).unwrap();
        assert_eq!(loaded, doc);
        assert!(loaded.find("e1").is_some());
    }
}
