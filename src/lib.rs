//! # folderbound
//!
//! Folder-backed entity synchronization. Directory trees of companies and
//! construction projects are exposed as structured records: folder names
//! carry the derived fields, a YAML sidecar in each folder carries the rest,
//! and a depth-bounded watcher keeps an in-memory index in step with both.
//!
//! ## Core Components
//!
//! - [`id`]: Short deterministic ids from folder names
//! - [`model`]: Company and project entities and their name conventions
//! - [`entity`]: The capability trait every entity kind implements
//! - [`scanner`]: Parallel listing of entity folders
//! - [`sidecar`]: Sidecar load/merge/save and the background save queue
//! - [`watcher`]: Recursive watch registration and event debouncing
//! - [`reconciler`]: Snapshot cache, reconciliation passes and upserts
//! - [`config`]: Layered configuration
//! - [`error`]: Error types
//! - [`metrics`]: Engine counters
//! - [`state`]: The set of running services
//! - [`types`]: Events shared between components

pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod metrics;
pub mod model;
pub mod reconciler;
pub mod scanner;
pub mod sidecar;
pub mod state;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;
