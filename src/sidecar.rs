//! Per-entity YAML attribute files.
//!
//! A sidecar holds the persisted fields of one entity plus a few mirror keys
//! echoing derived values. Loading merges only the persisted fields; when the
//! mirror keys on disk disagree with the folder, a corrected file is written
//! in the background through the [`SaveQueue`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tokio::sync::broadcast;

use crate::entity::{EntityKind, FolderEntity};
use crate::error::SidecarError;
use crate::metrics::Metrics;
use crate::types::EngineEvent;

/// On-disk shape of a sidecar: mirror keys, persisted fields, and whatever
/// else a human put into the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SidecarDocument<M, P> {
    #[serde(flatten)]
    pub mirror: M,
    #[serde(flatten)]
    pub persisted: P,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A sidecar whose persisted fields could not be read.
#[derive(Debug)]
pub struct Malformed {
    pub error: serde_yaml::Error,
    /// Keys outside both namespaces, when the file was a mapping at all.
    pub extra: BTreeMap<String, Value>,
}

/// Parses sidecar text.
///
/// Scalars are read leniently: a number or boolean where text is expected is
/// taken as its YAML rendering, and empty values fall back to the default.
/// Mirror keys that cannot be read are treated as stale.
pub fn decode<M, P>(text: &str) -> Result<SidecarDocument<M, P>, Malformed>
where
    M: Default + Serialize + DeserializeOwned,
    P: Default + Serialize + DeserializeOwned,
{
    let mapping = match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Mapping(mapping)) => mapping,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            let error = <serde_yaml::Error as serde::de::Error>::custom("sidecar is not a mapping");
            return Err(Malformed { error, extra: BTreeMap::new() });
        }
        Err(error) => return Err(Malformed { error, extra: BTreeMap::new() }),
    };

    let mut fields = field_names::<M>();
    fields.extend(field_names::<P>());

    let mut known = Mapping::new();
    let mut extra = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = scalar_text(&key) else { continue };
        if !fields.contains(&key) {
            extra.insert(key, value);
        } else if !value.is_null() {
            known.insert(Value::String(key), lenient(value));
        }
    }
    let known = Value::Mapping(known);

    let persisted = match serde_yaml::from_value(known.clone()) {
        Ok(persisted) => persisted,
        Err(error) => return Err(Malformed { error, extra }),
    };
    let mirror = serde_yaml::from_value(known).unwrap_or_default();
    Ok(SidecarDocument { mirror, persisted, extra })
}

/// Top-level keys `T` serializes to.
fn field_names<T: Default + Serialize>() -> HashSet<String> {
    match serde_yaml::to_value(T::default()) {
        Ok(Value::Mapping(mapping)) => mapping.keys().filter_map(scalar_text).collect(),
        _ => HashSet::new(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient(value: Value) -> Value {
    match value {
        Value::Number(_) | Value::Bool(_) => scalar_text(&value).map(Value::String).unwrap_or(value),
        Value::Sequence(items) => Value::Sequence(items.into_iter().filter(|v| !v.is_null()).map(lenient).collect()),
        Value::Tagged(tagged) => {
            let tagged = *tagged;
            lenient(tagged.value)
        }
        other => other,
    }
}

/// Serializes access to individual files.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `path`.
    pub fn with_lock<R>(&self, path: &Path, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        let _guard = lock.lock();
        f()
    }
}

fn temp_name(file_name: &str) -> String {
    format!(".{}.tmp", file_name)
}

/// Writes `content` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sidecar path has no file name"))?;
    let tmp = path.with_file_name(temp_name(file_name));
    fs::write(&tmp, content)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[derive(Default)]
struct QueueState {
    /// Latest content per path not yet picked up by the worker.
    pending: HashMap<PathBuf, String>,
    /// Messages sent to the worker and not yet processed.
    outstanding: usize,
}

struct QueueShared {
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Bounded background writer with at most one pending write per path.
pub struct SaveQueue {
    tx: Mutex<Option<SyncSender<PathBuf>>>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SaveQueue {
    pub fn new(
        kind: EntityKind,
        capacity: usize,
        locks: Arc<PathLocks>,
        metrics: Metrics,
        events: broadcast::Sender<EngineEvent>,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<PathBuf>(capacity.max(1));
        let shared = Arc::new(QueueShared { state: Mutex::new(QueueState::default()), idle: Condvar::new() });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new().name(format!("{}-sidecar-writer", kind)).spawn(move || {
            for path in rx {
                let written = locks.with_lock(&path, || {
                    let content = worker_shared.state.lock().pending.remove(&path);
                    content.map(|content| write_atomic(&path, &content))
                });
                match written {
                    Some(Ok(())) => {
                        metrics.inc_sidecar_saves();
                        tracing::debug!("Saved sidecar {}", path.display());
                    }
                    Some(Err(e)) => {
                        metrics.inc_sidecar_save_failures();
                        tracing::warn!("Failed to save sidecar {}: {}", path.display(), e);
                        let _ = events.send(EngineEvent::SidecarSaveFailed {
                            kind,
                            path: path.clone(),
                            message: e.to_string(),
                        });
                    }
                    // superseded by a synchronous save
                    None => {}
                }
                let mut state = worker_shared.state.lock();
                state.outstanding = state.outstanding.saturating_sub(1);
                if state.outstanding == 0 {
                    worker_shared.idle.notify_all();
                }
            }
        })?;

        Ok(Self { tx: Mutex::new(Some(tx)), shared, worker: Mutex::new(Some(worker)) })
    }

    /// Queues `content` for `path`. Returns `false` when the write was dropped.
    pub fn enqueue(&self, path: PathBuf, content: String) -> bool {
        let tx_guard = self.tx.lock();
        let Some(tx) = tx_guard.as_ref() else {
            tracing::warn!("Save queue closed, dropping write to {}", path.display());
            return false;
        };

        let mut state = self.shared.state.lock();
        if let Some(queued) = state.pending.get_mut(&path) {
            *queued = content;
            return true;
        }
        state.pending.insert(path.clone(), content);
        state.outstanding += 1;
        match tx.try_send(path) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) | Err(TrySendError::Disconnected(path)) => {
                state.pending.remove(&path);
                state.outstanding -= 1;
                if state.outstanding == 0 {
                    self.shared.idle.notify_all();
                }
                tracing::warn!("Save queue full, dropping write to {}", path.display());
                false
            }
        }
    }

    /// Drops a queued write for `path`. The caller must hold the path lock.
    pub fn discard(&self, path: &Path) {
        self.shared.state.lock().pending.remove(path);
    }

    /// Blocks until every queued write has been processed or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.outstanding > 0 {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.outstanding == 0;
            }
        }
        true
    }

    /// Stops accepting writes and waits for the worker to drain the queue.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Sidecar writer thread panicked");
            }
        }
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// Loads and saves the sidecars of one entity kind.
pub struct SidecarStore<E: FolderEntity> {
    filename: String,
    locks: Arc<PathLocks>,
    queue: SaveQueue,
    metrics: Metrics,
    _entity: PhantomData<fn() -> E>,
}

type Document<E> = SidecarDocument<<E as FolderEntity>::Mirror, <E as FolderEntity>::Persisted>;

impl<E: FolderEntity> SidecarStore<E> {
    pub fn new(
        filename: impl Into<String>,
        queue_capacity: usize,
        metrics: Metrics,
        events: broadcast::Sender<EngineEvent>,
    ) -> io::Result<Self> {
        let locks = Arc::new(PathLocks::new());
        let queue = SaveQueue::new(E::KIND, queue_capacity, Arc::clone(&locks), metrics.clone(), events)?;
        Ok(Self { filename: filename.into(), locks, queue, metrics, _entity: PhantomData })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path_for(&self, entity: &E) -> PathBuf {
        entity.conventional_path(&self.filename)
    }

    /// Merges the persisted fields from the entity's sidecar into `entity`.
    ///
    /// A missing or malformed sidecar is (re)created from `entity` in the
    /// background. A sidecar whose mirror keys are stale is rewritten with
    /// its persisted fields and unknown keys intact.
    pub fn load(&self, mut entity: E) -> Result<E, SidecarError> {
        let path = self.path_for(&entity);
        let read = self.locks.with_lock(&path, || fs::read_to_string(&path));
        let text = match read {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Creating sidecar {}", path.display());
                self.metrics.inc_sidecars_created();
                self.schedule(path, &entity, BTreeMap::new())?;
                return Ok(entity);
            }
            Err(source) => return Err(SidecarError::Io { path, source }),
        };

        let doc: Document<E> = match decode(&text) {
            Ok(doc) => doc,
            Err(malformed) => {
                tracing::warn!("Malformed sidecar {}, rewriting: {}", path.display(), malformed.error);
                self.schedule(path, &entity, malformed.extra)?;
                return Ok(entity);
            }
        };

        *entity.persisted_mut() = doc.persisted;
        entity.refresh_derived();
        if entity.mirror() != doc.mirror {
            tracing::debug!("Sidecar {} is stale, rewriting", path.display());
            self.schedule(path, &entity, doc.extra)?;
        }
        Ok(entity)
    }

    /// Writes the entity's sidecar now, keeping unknown keys already in the file.
    pub fn save(&self, entity: &E) -> Result<(), SidecarError> {
        let path = self.path_for(entity);
        self.locks.with_lock(&path, || -> Result<(), SidecarError> {
            self.queue.discard(&path);
            let extra = match fs::read_to_string(&path) {
                Ok(text) => decode::<E::Mirror, E::Persisted>(&text).map_or_else(|m| m.extra, |doc| doc.extra),
                Err(_) => BTreeMap::new(),
            };
            let content = encode(&path, entity, extra)?;
            write_atomic(&path, &content).map_err(|source| SidecarError::Io { path: path.clone(), source })?;
            self.metrics.inc_sidecar_saves();
            Ok(())
        })
    }

    /// Drops a background write still queued for the entity's sidecar.
    pub fn discard_pending(&self, entity: &E) {
        let path = self.path_for(entity);
        self.locks.with_lock(&path, || self.queue.discard(&path));
    }

    /// Names of the files the store writes into an entity folder.
    pub fn own_file_names(&self) -> Vec<String> {
        vec![self.filename.clone(), temp_name(&self.filename)]
    }

    /// Waits until background writes are done. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    /// Flushes and stops the background writer.
    pub fn close(&self) {
        self.queue.close();
    }

    fn schedule(&self, path: PathBuf, entity: &E, extra: BTreeMap<String, Value>) -> Result<(), SidecarError> {
        let content = encode(&path, entity, extra)?;
        self.queue.enqueue(path, content);
        Ok(())
    }
}

fn encode<E: FolderEntity>(
    path: &Path,
    entity: &E,
    extra: BTreeMap<String, Value>,
) -> Result<String, SidecarError> {
    let doc = SidecarDocument { mirror: entity.mirror(), persisted: entity.persisted_of().clone(), extra };
    serde_yaml::to_string(&doc).map_err(|source| SidecarError::Encode { path: path.to_path_buf(), source })
}
