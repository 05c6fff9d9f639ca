use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Engine counters, shared by every reconciler of a process
#[derive(Clone)]
pub struct Metrics {
    pub reconcile_passes: Arc<AtomicUsize>,
    pub reconcile_failures: Arc<AtomicUsize>,
    pub entities_published: Arc<AtomicU64>,
    pub entries_skipped: Arc<AtomicU64>,
    pub sidecars_created: Arc<AtomicU64>,
    pub sidecar_saves: Arc<AtomicU64>,
    pub sidecar_save_failures: Arc<AtomicU64>,
    pub watch_events: Arc<AtomicU64>,
    pub watch_errors: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reconcile_passes: Arc::new(AtomicUsize::new(0)),
            reconcile_failures: Arc::new(AtomicUsize::new(0)),
            entities_published: Arc::new(AtomicU64::new(0)),
            entries_skipped: Arc::new(AtomicU64::new(0)),
            sidecars_created: Arc::new(AtomicU64::new(0)),
            sidecar_saves: Arc::new(AtomicU64::new(0)),
            sidecar_save_failures: Arc::new(AtomicU64::new(0)),
            watch_events: Arc::new(AtomicU64::new(0)),
            watch_errors: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_reconcile_passes(&self) {
        self.reconcile_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconcile_failures(&self) {
        self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_entities(&self, count: u64) {
        self.entities_published.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.entries_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_sidecars_created(&self) {
        self.sidecars_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sidecar_saves(&self) {
        self.sidecar_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sidecar_save_failures(&self) {
        self.sidecar_save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_watch_events(&self, count: u64) {
        self.watch_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_watch_errors(&self) {
        self.watch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_passes: self.reconcile_passes.load(Ordering::Relaxed),
            reconcile_failures: self.reconcile_failures.load(Ordering::Relaxed),
            entities_published: self.entities_published.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            sidecars_created: self.sidecars_created.load(Ordering::Relaxed),
            sidecar_saves: self.sidecar_saves.load(Ordering::Relaxed),
            sidecar_save_failures: self.sidecar_save_failures.load(Ordering::Relaxed),
            watch_events: self.watch_events.load(Ordering::Relaxed),
            watch_errors: self.watch_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub reconcile_passes: usize,
    pub reconcile_failures: usize,
    pub entities_published: u64,
    pub entries_skipped: u64,
    pub sidecars_created: u64,
    pub sidecar_saves: u64,
    pub sidecar_save_failures: u64,
    pub watch_events: u64,
    pub watch_errors: u64,
    pub uptime_seconds: u64,
}
