//! The authoritative in-memory index of one entity kind.
//!
//! A reconciliation pass scans the root folder, merges every entity with its
//! sidecar, sorts, and publishes the result as a new [`Snapshot`]. Readers
//! clone the current `Arc<Snapshot>` and never observe a half-built index.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::entity::{derive_entity_id, FolderEntity};
use crate::error::{validation, EngineError, EngineResult, OptionExt};
use crate::metrics::Metrics;
use crate::model::category::{categories, Category};
use crate::model::Company;
use crate::scanner::{scan_with, FolderDescriptor, WorkerConfig};
use crate::sidecar::SidecarStore;
use crate::types::EngineEvent;
use crate::watcher::{RecursiveWatcher, WatcherSettings};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings<E: FolderEntity> {
    /// Folder whose direct subfolders are the entities.
    pub root: PathBuf,
    pub sidecar_filename: String,
    pub entity: E::Settings,
    pub workers: WorkerConfig,
    pub watcher: WatcherSettings,
    pub save_queue_capacity: usize,
}

/// An immutable, sorted view of all entities of one kind.
#[derive(Debug)]
pub struct Snapshot<E> {
    pub generation: u64,
    entities: Vec<E>,
    index: HashMap<String, usize>,
}

impl<E: FolderEntity> Snapshot<E> {
    pub fn empty() -> Self {
        Self { generation: 0, entities: Vec::new(), index: HashMap::new() }
    }

    /// Sorts `items` and indexes them by id. Later duplicates of an id are dropped.
    pub fn build(generation: u64, mut items: Vec<E>) -> Self {
        items.sort_by(|a, b| a.publish_order(b));
        let mut entities = Vec::with_capacity(items.len());
        let mut index = HashMap::with_capacity(items.len());
        for item in items {
            if let Some(&kept) = index.get(item.id()) {
                let kept: &E = &entities[kept];
                tracing::warn!(
                    "Duplicate {} id {}: keeping {}, ignoring {}",
                    E::KIND,
                    item.id(),
                    kept.folder().display(),
                    item.folder().display()
                );
                continue;
            }
            index.insert(item.id().to_string(), entities.len());
            entities.push(item);
        }
        Self { generation, entities, index }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> &[E] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub struct Reconciler<E: FolderEntity> {
    root: PathBuf,
    settings: ReconcilerSettings<E>,
    store: SidecarStore<E>,
    cache: RwLock<Arc<Snapshot<E>>>,
    pass_lock: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
    metrics: Metrics,
}

impl<E: FolderEntity> Reconciler<E> {
    /// Opens the index for `settings.root` and runs the first pass.
    pub fn open(settings: ReconcilerSettings<E>, metrics: Metrics) -> EngineResult<Arc<Self>> {
        let root = fs::canonicalize(&settings.root)
            .map_err(|source| EngineError::RootUnreadable { path: settings.root.clone(), source })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = SidecarStore::new(
            settings.sidecar_filename.clone(),
            settings.save_queue_capacity,
            metrics.clone(),
            events.clone(),
        )?;

        let reconciler = Arc::new(Self {
            root,
            settings,
            store,
            cache: RwLock::new(Arc::new(Snapshot::empty())),
            pass_lock: Mutex::new(()),
            events,
            metrics,
        });
        let snapshot = reconciler.reconcile()?;
        tracing::info!(
            "Loaded {} {} entities from {}",
            snapshot.len(),
            E::KIND,
            reconciler.root.display()
        );
        Ok(reconciler)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &ReconcilerSettings<E> {
        &self.settings
    }

    pub fn store(&self) -> &SidecarStore<E> {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Snapshot<E>> {
        Arc::clone(&self.cache.read())
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.snapshot().get(id).cloned()
    }

    pub fn list(&self) -> Vec<E> {
        self.snapshot().entities().to_vec()
    }

    /// Waits for background sidecar writes. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.store.wait_idle(timeout)
    }

    /// Runs one full pass and publishes its snapshot.
    pub fn reconcile(&self) -> EngineResult<Arc<Snapshot<E>>> {
        let _pass = self.pass_lock.lock();

        let outcome = scan_with(
            &self.root,
            &self.settings.workers,
            &self.settings.watcher.exclude_markers,
            |descriptor| self.build(descriptor),
        );
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(source) => {
                self.metrics.inc_reconcile_failures();
                return Err(EngineError::RootUnreadable { path: self.root.clone(), source });
            }
        };

        let generation = self.snapshot().generation + 1;
        let skipped = outcome.skipped;
        let snapshot = Arc::new(Snapshot::build(generation, outcome.items));
        *self.cache.write() = Arc::clone(&snapshot);

        self.metrics.inc_reconcile_passes();
        self.metrics.add_entities(snapshot.len() as u64);
        self.metrics.add_skipped(skipped as u64);
        tracing::debug!(
            "Reconciled {} {} entities (generation {}, {} skipped)",
            snapshot.len(),
            E::KIND,
            generation,
            skipped
        );
        let _ = self.events.send(EngineEvent::Reconciled {
            kind: E::KIND,
            generation,
            entities: snapshot.len(),
            skipped,
        });
        Ok(snapshot)
    }

    fn build(&self, descriptor: &FolderDescriptor) -> EngineResult<E> {
        let entity = E::parse(&descriptor.path, &self.settings.entity)?;
        Ok(self.store.load(entity)?)
    }

    /// Applies `updated` to the entity currently known as `previous_id`.
    ///
    /// The folder is renamed to the name implied by `updated`'s derived
    /// fields, and its sidecar is rewritten with `updated`'s persisted
    /// fields. Returns the entity as it was before.
    pub fn upsert(&self, previous_id: &str, updated: E) -> EngineResult<E> {
        let _pass = self.pass_lock.lock();
        let current = self.snapshot();

        let previous = current
            .get(previous_id)
            .cloned()
            .ok_or_not_found(&format!("{} {}", E::KIND, previous_id))?;

        let new_name = updated.conventional_name().map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        validation::validate_folder_name(&new_name)?;

        let target = self.root.join(&new_name);
        let renamed = target != previous.folder();
        if renamed && target.exists() {
            return Err(EngineError::Conflict(format!("folder {} already exists", target.display())));
        }
        let new_id = derive_entity_id(E::KIND, &new_name);
        if new_id != previous_id && current.get(&new_id).is_some() {
            return Err(EngineError::Conflict(format!("{} id {} is already in use", E::KIND, new_id)));
        }

        if renamed {
            self.store.discard_pending(&previous);
            fs::rename(previous.folder(), &target)?;
            tracing::info!("Renamed {} to {}", previous.folder().display(), target.display());
        }

        let stored = self.apply_update(&target, &updated);
        let entity = match stored {
            Ok(entity) => entity,
            Err(e) => {
                if renamed {
                    if let Err(rollback) = fs::rename(&target, previous.folder()) {
                        tracing::error!(
                            "Failed to roll back rename of {} to {}: {}",
                            target.display(),
                            previous.folder().display(),
                            rollback
                        );
                    }
                }
                return Err(e);
            }
        };

        let new_id = entity.id().to_string();
        let mut items: Vec<E> = current.entities().iter().filter(|e| e.id() != previous_id).cloned().collect();
        items.push(entity);
        let generation = current.generation + 1;
        *self.cache.write() = Arc::new(Snapshot::build(generation, items));

        let _ = self.events.send(EngineEvent::Upserted {
            kind: E::KIND,
            previous_id: previous_id.to_string(),
            id: new_id,
        });
        Ok(previous)
    }

    fn apply_update(&self, folder: &Path, updated: &E) -> EngineResult<E> {
        let mut entity = E::parse(folder, &self.settings.entity)?;
        *entity.persisted_mut() = updated.persisted_of().clone();
        entity.refresh_derived();
        self.store.save(&entity)?;
        Ok(entity)
    }

    /// Starts the watcher and a driver task that re-runs [`reconcile`](Self::reconcile)
    /// after every debounced change.
    pub fn start_watching(self: &Arc<Self>) -> EngineResult<WatchHandle> {
        let mut watch_settings = self.settings.watcher.clone();
        watch_settings.ignored_names.extend(self.store.own_file_names());
        let (watcher, mut streams) = RecursiveWatcher::start(&self.root, &watch_settings)?;
        let this = Arc::clone(self);

        let driver = tokio::spawn(async move {
            let mut errors_open = true;
            loop {
                tokio::select! {
                    change = streams.events.recv() => {
                        let Some(change) = change else { break };
                        let mut changes = vec![change];
                        while let Ok(more) = streams.events.try_recv() {
                            changes.push(more);
                        }
                        this.metrics.add_watch_events(changes.len() as u64);
                        tracing::debug!("{} change(s) under {}, rescanning", changes.len(), this.root.display());
                        for change in changes {
                            let _ = this.events.send(EngineEvent::Changed {
                                kind: E::KIND,
                                path: change.path,
                                op: change.op,
                            });
                        }

                        let worker = Arc::clone(&this);
                        match tokio::task::spawn_blocking(move || worker.reconcile()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!("Rescan of {} failed: {}", this.root.display(), e),
                            Err(e) => tracing::error!("Rescan task failed: {}", e),
                        }
                    }
                    err = streams.errors.recv(), if errors_open => match err {
                        Some(e) => {
                            this.metrics.inc_watch_errors();
                            tracing::warn!("Watch error under {}: {}", this.root.display(), e);
                            let _ = this.events.send(EngineEvent::WatchError { kind: E::KIND, message: e.to_string() });
                        }
                        None => errors_open = false,
                    },
                }
            }
        });

        Ok(WatchHandle { watcher, driver })
    }
}

impl Reconciler<Company> {
    /// The fixed company category table.
    pub fn categories(&self) -> &'static [Category] {
        categories()
    }
}

/// Keeps a reconciler's watcher running until [`shutdown`](Self::shutdown).
pub struct WatchHandle {
    watcher: RecursiveWatcher,
    driver: JoinHandle<()>,
}

impl WatchHandle {
    /// Stops the watcher, lets the driver handle the flushed events, and waits for it.
    pub async fn shutdown(self) {
        self.watcher.shutdown().await;
        if let Err(e) = self.driver.await {
            tracing::error!("Watch driver failed: {}", e);
        }
    }
}
