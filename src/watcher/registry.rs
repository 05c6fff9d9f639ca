use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};
use walkdir::WalkDir;

use crate::types::{FileEvent, FileOp};

/// A single-directory watch primitive.
pub trait WatchBackend {
    fn watch(&mut self, path: &Path) -> notify::Result<()>;
    fn unwatch(&mut self, path: &Path) -> notify::Result<()>;
}

impl WatchBackend for notify::RecommendedWatcher {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::watch(self, path, RecursiveMode::NonRecursive)
    }

    fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::unwatch(self, path)
    }
}

/// The set of watched directories below a root, bounded by depth.
///
/// The root is level 0; directories deeper than `max_depth` are never
/// registered.
pub struct WatchTree<B> {
    backend: B,
    root: PathBuf,
    max_depth: usize,
    exclude_markers: Vec<String>,
    watched: BTreeSet<PathBuf>,
}

impl<B: WatchBackend> WatchTree<B> {
    pub fn new(backend: B, root: impl Into<PathBuf>, max_depth: usize, exclude_markers: Vec<String>) -> Self {
        Self { backend, root: root.into(), max_depth, exclude_markers, watched: BTreeSet::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether `path` contains one of the reserved markers.
    pub fn is_excluded(&self, path: &Path) -> bool {
        path_has_marker(path, &self.exclude_markers)
    }

    /// Level of `path` below the root, `None` outside of it.
    pub fn depth_of(&self, path: &Path) -> Option<usize> {
        path.strip_prefix(&self.root).ok().map(|rel| rel.components().count())
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Watches the root and every directory below it within depth.
    ///
    /// Only failing to watch the root itself is an error.
    pub fn register_root(&mut self) -> notify::Result<usize> {
        let root = self.root.clone();
        self.backend.watch(&root)?;
        self.watched.insert(root.clone());
        Ok(1 + self.register_below(&root, self.max_depth))
    }

    /// Watches `dir` and its subdirectories up to the remaining depth budget.
    pub fn register(&mut self, dir: &Path) -> usize {
        let Some(depth) = self.depth_of(dir) else {
            return 0;
        };
        if depth > self.max_depth || self.is_excluded(dir) {
            return 0;
        }
        let mut added = 0;
        if !self.watched.contains(dir) {
            match self.backend.watch(dir) {
                Ok(()) => {
                    self.watched.insert(dir.to_path_buf());
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to watch {}: {}", dir.display(), e);
                    return 0;
                }
            }
        }
        added + self.register_below(dir, self.max_depth - depth)
    }

    fn register_below(&mut self, dir: &Path, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }
        let markers = &self.exclude_markers;
        let dirs: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(budget)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !path_has_marker(e.path(), markers))
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_dir() => Some(e.into_path()),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry while registering watches: {}", e);
                    None
                }
            })
            .collect();

        let mut added = 0;
        for path in dirs {
            if self.watched.contains(&path) {
                continue;
            }
            match self.backend.watch(&path) {
                Ok(()) => {
                    self.watched.insert(path);
                    added += 1;
                }
                Err(e) => tracing::warn!("Failed to watch {}: {}", path.display(), e),
            }
        }
        added
    }

    /// Drops the watch on `path` and on every watched path below it.
    pub fn unregister(&mut self, path: &Path) -> usize {
        let gone: Vec<PathBuf> = self
            .watched
            .range(path.to_path_buf()..)
            .take_while(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in &gone {
            // the directory is usually gone already
            if let Err(e) = self.backend.unwatch(p) {
                tracing::debug!("Unwatch {} failed: {}", p.display(), e);
            }
            self.watched.remove(p);
        }
        gone.len()
    }

    /// Updates the registration for one change.
    pub fn apply(&mut self, event: &FileEvent) {
        match event.op {
            FileOp::Create => {
                if event.path.is_dir() {
                    let added = self.register(&event.path);
                    if added > 0 {
                        tracing::debug!("Watching {} new directories under {}", added, event.path.display());
                    }
                }
            }
            FileOp::Remove | FileOp::Rename => {
                self.unregister(&event.path);
            }
            FileOp::Write | FileOp::Chmod => {}
        }
    }
}

fn path_has_marker(path: &Path, markers: &[String]) -> bool {
    let text = path.to_string_lossy();
    markers.iter().any(|m| !m.is_empty() && text.contains(m.as_str()))
}
