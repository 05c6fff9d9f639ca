use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::entity::FolderEntity;
use crate::error::EngineResult;

/// Bounds for the scan worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub cpu_multiplier: usize,
}

/// Lightweight stat of one directory entry, handed to the per-entry builder.
#[derive(Debug, Clone)]
pub struct FolderDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub struct ScanOutcome<T> {
    /// Built items in completion order.
    pub items: Vec<T>,
    /// Entries dropped because stat or build failed.
    pub skipped: usize,
}

impl<T> Default for ScanOutcome<T> {
    fn default() -> Self {
        Self { items: Vec::new(), skipped: 0 }
    }
}

/// Number of workers to use for `item_count` entries on this machine.
pub fn decide_num_workers(item_count: usize, cfg: &WorkerConfig) -> usize {
    decide_num_workers_for(item_count, num_cpus::get(), cfg)
}

/// Worker count for a given CPU count.
///
/// `cpu_count * cpu_multiplier` clamped to `[min_workers, max_workers]`;
/// when there are fewer items than that, half the items (at least one).
pub fn decide_num_workers_for(item_count: usize, cpu_count: usize, cfg: &WorkerConfig) -> usize {
    if item_count == 0 {
        return 0;
    }
    let min = cfg.min_workers.max(1);
    let max = cfg.max_workers.max(min);
    let mut workers = cpu_count.max(1).saturating_mul(cfg.cpu_multiplier.max(1)).clamp(min, max);
    if item_count < workers {
        workers = (item_count / 2).max(1);
    }
    workers.min(item_count)
}

fn describe(name: &str, path: &Path) -> io::Result<FolderDescriptor> {
    let md = fs::metadata(path)?;
    Ok(FolderDescriptor {
        name: name.to_string(),
        path: path.to_path_buf(),
        is_dir: md.is_dir(),
        size: md.len(),
        modified: md.modified().ok().map(DateTime::<Local>::from),
    })
}

fn is_excluded(name: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|marker| !marker.is_empty() && name.contains(marker.as_str()))
}

/// Lists the directories directly below `root` and runs `build` on each in parallel.
///
/// Only a failure to list `root` is fatal. Entries failing stat or `build`
/// are logged and counted in [`ScanOutcome::skipped`].
pub fn scan_with<T, F>(root: &Path, workers: &WorkerConfig, excludes: &[String], build: F) -> io::Result<ScanOutcome<T>>
where
    T: Send,
    F: Fn(&FolderDescriptor) -> EngineResult<T> + Sync,
{
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    let mut skipped = 0usize;
    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry under {}: {}", root.display(), e);
                skipped += 1;
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping non UTF-8 entry {}", entry.path().display());
            skipped += 1;
            continue;
        };
        if is_excluded(&name, excludes) {
            continue;
        }
        // symlinked folders count as folders
        match fs::metadata(entry.path()) {
            Ok(md) if md.is_dir() => entries.push((name, entry.path())),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to stat {}: {}", entry.path().display(), e);
                skipped += 1;
            }
        }
    }

    let num_workers = decide_num_workers(entries.len(), workers);
    if num_workers == 0 {
        return Ok(ScanOutcome { items: Vec::new(), skipped });
    }

    let (job_tx, job_rx) = mpsc::sync_channel::<usize>(num_workers * 2);
    let job_rx = Mutex::new(job_rx);
    let (res_tx, res_rx) = mpsc::channel::<Option<T>>();

    thread::scope(|s| {
        for _ in 0..num_workers {
            let res_tx = res_tx.clone();
            let job_rx = &job_rx;
            let entries = &entries;
            let build = &build;
            s.spawn(move || loop {
                let next = job_rx.lock().recv();
                let Ok(idx) = next else { break };
                let (name, path) = &entries[idx];
                let built = match describe(name, path) {
                    Ok(descriptor) => match build(&descriptor) {
                        Ok(item) => Some(item),
                        Err(e) => {
                            tracing::warn!("Skipping {}: {}", path.display(), e);
                            None
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to stat {}: {}", path.display(), e);
                        None
                    }
                };
                if res_tx.send(built).is_err() {
                    break;
                }
            });
        }
        drop(res_tx);

        for idx in 0..entries.len() {
            if job_tx.send(idx).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let mut items = Vec::with_capacity(entries.len());
    for built in res_rx {
        match built {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
    }
    Ok(ScanOutcome { items, skipped })
}

/// Parses every folder below `root` as an `E`, without touching sidecars.
pub fn scan<E: FolderEntity>(
    root: &Path,
    settings: &E::Settings,
    workers: &WorkerConfig,
    excludes: &[String],
) -> io::Result<ScanOutcome<E>> {
    scan_with(root, workers, excludes, |d| Ok(E::parse(&d.path, settings)?))
}
