//! Depth-bounded recursive watching with per-path debouncing.
//!
//! Each directory gets its own non-recursive OS watch so that the watched
//! set can be bounded by depth and kept in step with directories that come
//! and go. Raw events are converted to [`FileEvent`]s, applied to the
//! [`WatchTree`], and passed through the debouncer before reaching the
//! consumer.

pub mod debounce;
pub mod registry;

use std::path::Path;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind, RenameMode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;
use crate::types::{FileEvent, FileOp};

pub use debounce::{spawn_debouncer, DebounceTable};
pub use registry::{WatchBackend, WatchTree};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub max_depth: usize,
    pub debounce: Duration,
    /// Capacity of the debounced event and error channels.
    pub event_buffer: usize,
    pub exclude_markers: Vec<String>,
    /// File names whose changes are dropped, e.g. files the engine writes itself.
    pub ignored_names: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            max_depth: 2,
            debounce: Duration::from_millis(1000),
            event_buffer: 256,
            exclude_markers: vec![".SynologyWorkingDirectory".to_string()],
            ignored_names: Vec::new(),
        }
    }
}

/// Converts a raw notification into zero or more [`FileEvent`]s.
pub fn convert_event(event: notify::Event) -> Vec<FileEvent> {
    let op = match event.kind {
        EventKind::Create(_) => FileOp::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileOp::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            return match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileEvent::new(from, FileOp::Rename), FileEvent::new(to, FileOp::Create)],
                (Some(from), None) => vec![FileEvent::new(from, FileOp::Rename)],
                _ => Vec::new(),
            };
        }
        EventKind::Modify(ModifyKind::Name(_)) => FileOp::Rename,
        EventKind::Modify(ModifyKind::Metadata(_)) => FileOp::Chmod,
        EventKind::Modify(_) | EventKind::Any => FileOp::Write,
        EventKind::Remove(_) => FileOp::Remove,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };
    event.paths.into_iter().map(|path| FileEvent::new(path, op)).collect()
}

/// Whether the final component of `path` is one of `names`.
pub fn has_ignored_name(path: &Path, names: &[String]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| names.iter().any(|ignored| ignored == name))
}

/// Receiving ends of a running [`RecursiveWatcher`].
pub struct WatchStreams {
    /// Debounced changes. Closes after shutdown once pending events are flushed.
    pub events: mpsc::Receiver<FileEvent>,
    pub errors: mpsc::Receiver<notify::Error>,
}

pub struct RecursiveWatcher {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RecursiveWatcher {
    /// Starts watching `root`. Must be called from within a tokio runtime.
    pub fn start(root: &Path, settings: &WatcherSettings) -> EngineResult<(Self, WatchStreams)> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let backend = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = raw_tx.send(res);
        })?;

        let mut tree = WatchTree::new(backend, root, settings.max_depth, settings.exclude_markers.clone());
        let registered = tree.register_root()?;
        tracing::info!("Watching {} directories under {}", registered, root.display());

        let buffer = settings.event_buffer.max(1);
        let (debounce_tx, debounce_rx) = mpsc::channel::<FileEvent>(buffer);
        let (out_tx, out_rx) = mpsc::channel::<FileEvent>(buffer);
        let (err_tx, err_rx) = mpsc::channel::<notify::Error>(buffer);
        let cancel = CancellationToken::new();
        let ignored_names = settings.ignored_names.clone();

        let loop_cancel = cancel.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    raw = raw_rx.recv() => match raw {
                        Some(Ok(event)) => {
                            for change in convert_event(event) {
                                if tree.is_excluded(&change.path) || has_ignored_name(&change.path, &ignored_names) {
                                    continue;
                                }
                                tree.apply(&change);
                                if debounce_tx.send(change).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            if err_tx.try_send(e).is_err() {
                                tracing::warn!("Watch error channel full, dropping error");
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Watcher for {} stopped", tree.root().display());
        });

        let debouncer = spawn_debouncer(settings.debounce, debounce_rx, out_tx);

        Ok((
            Self { cancel, tasks: vec![event_loop, debouncer] },
            WatchStreams { events: out_rx, errors: err_rx },
        ))
    }

    /// Stops watching, flushes pending debounced events and waits for the tasks.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Watcher task failed: {}", e);
            }
        }
    }
}

impl Drop for RecursiveWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
