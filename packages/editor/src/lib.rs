//! # Tiledoc Editor
//!
//! History, undo and synchronization engine for tile-based documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Tree: monitored state + manager-driven API  │
//! │  - diff every action into patches           │
//! │  - push shared model snapshots              │
//! │  - recompute dependent tiles                │
//! └─────────────────────────────────────────────┘
//!                 ↓ TreeHost      ↑ TreeClient
//! ┌─────────────────────────────────────────────┐
//! │ TreeManager: history log + coordination     │
//! │  - entries / exchanges / commit order       │
//! │  - shared model fan-out with timeouts       │
//! │  - undo / redo / replay                     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ ChangeDocument: persisted history JSON      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Patches are the history**: every change is stored as forward and
//!    inverse JSON patches per tree
//! 2. **One entry per user action**: cascading shared model updates land in
//!    the entry that caused them
//! 3. **Manager patches never cascade**: trees defer tile recomputes while
//!    undo, redo or replay patches are applied
//! 4. **Single-threaded**: trees and the manager share one task; nothing is
//!    `Send`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tiledoc_editor::{ManagerConfig, PlainBehavior, TreeManager};
//!
//! let manager = TreeManager::new(ManagerConfig::default());
//! let tree = manager.attach_tree("t1", json!({ "count": 0 }), PlainBehavior);
//!
//! tree.action("/setCount", |state| {
//!     state["count"] = json!(1);
//!     Ok(())
//! })
//! .await?;
//!
//! manager.undo().await?;
//! assert_eq!(tree.get("/count"), Some(json!(0)));
//! ```

mod config;
mod document;
mod errors;
mod history;
mod manager;
mod monitor;
mod patch;
mod registry;
mod replay;
mod shared_models;
mod tree;
mod undo_store;

pub use config::{ManagerConfig, DEFAULT_CONFIG_NAME};
pub use document::{
    assign_index_of_type, empty_document, index_of_type, link_tile, put_shared_model, put_tile,
    shared_model_entry, shared_model_ids, shared_model_pointer, shared_model_provider,
    shared_model_tiles, snapshot_type, tile_content_pointer, tile_shared_models, unlink_tile,
    DocumentBehavior, INDEX_OF_TYPE, SHARED_MODEL_MAP, TILE_MAP,
};
pub use errors::HistoryError;
pub use history::{
    ChangeDocument, EntryState, HistoryEntry, HistoryOperation, TreeRecordEntry, MANAGER_TREE_ID,
};
pub use manager::{TreeManager, REPLAY_ENTRY_ID};
pub use monitor::modified_shared_models;
pub use patch::{apply_patch, apply_patches, diff, Diff, JsonPatch, PatchError, PatchOp};
pub use registry::{
    ContentRegistry, RegistryBuilder, SharedModelKind, TileContent, UNKNOWN_SHARED_MODEL,
};
pub use shared_models::SharedModelDocumentManager;
pub use tree::{PlainBehavior, Tree, TreeBehavior, TreeClient, TreeHost, TreeMode};
pub use undo_store::UndoStore;
