use std::path::PathBuf;

use serde::Serialize;

use crate::entity::EntityKind;

/// Kind of filesystem change carried by a [`FileEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub op: FileOp,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, op: FileOp) -> Self {
        Self { path: path.into(), op }
    }
}

/// Notifications broadcast by a reconciler to its subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A debounced filesystem change that triggers a rescan.
    Changed { kind: EntityKind, path: PathBuf, op: FileOp },
    /// A new snapshot has been published.
    Reconciled { kind: EntityKind, generation: u64, entities: usize, skipped: usize },
    /// An entity was renamed or had its sidecar rewritten through `upsert`.
    Upserted { kind: EntityKind, previous_id: String, id: String },
    SidecarSaveFailed { kind: EntityKind, path: PathBuf, message: String },
    WatchError { kind: EntityKind, message: String },
}
