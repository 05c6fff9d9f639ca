//! Unit and integration tests for the folderbound engine.
//!
//! ## Test Modules
//!
//! - **id_tests**: Id generation
//! - **model_tests**: Folder name parsing for companies and projects, date tokens
//! - **scanner_tests**: Worker sizing and parallel folder scans
//! - **sidecar_tests**: Sidecar load/merge/save and the save queue
//! - **watcher_tests**: Event conversion, watch registration and debouncing
//! - **reconciler_tests**: Snapshots, reconciliation, upserts and live watching
//! - **config_tests**: Configuration loading and validation
//! - **error_tests**: Error formatting and name validation
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test sidecar_tests
//! ```

pub mod config_tests;
pub mod watcher_tests;
