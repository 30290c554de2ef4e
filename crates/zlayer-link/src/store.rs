//! Resource store
//!
//! Provides the narrow read/upsert/watch contract the link controller runs
//! against, with an in-memory backend and a JSON file backend.

use crate::error::StoreError;
use crate::resource::{Resource, ResourceKey, ResourceSpec};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Buffered change notifications per watcher; extra events are coalesced
const WATCH_CAPACITY: usize = 16;

/// Receiver of change notifications (carries the key that changed)
pub type EventReceiver = mpsc::Receiver<ResourceKey>;

type Initializer = Box<dyn FnOnce() -> ResourceSpec + Send>;
type Mutator = Box<dyn FnOnce(&mut ResourceSpec) -> Result<(), String> + Send>;

/// Create-if-absent-else-mutate write
pub struct UpsertRequest {
    pub key: ResourceKey,
    initializer: Initializer,
    mutator: Mutator,
}

impl UpsertRequest {
    /// Build a request from an initializer (resource absent) and a mutator
    /// (resource present)
    pub fn new(
        key: ResourceKey,
        initializer: impl FnOnce() -> ResourceSpec + Send + 'static,
        mutator: impl FnOnce(&mut ResourceSpec) -> Result<(), String> + Send + 'static,
    ) -> Self {
        Self {
            key,
            initializer: Box::new(initializer),
            mutator: Box::new(mutator),
        }
    }

    /// Request that leaves the resource holding exactly `spec`
    pub fn replace(key: ResourceKey, spec: ResourceSpec) -> Self {
        let initial = spec.clone();
        Self::new(
            key,
            move || initial,
            move |existing| {
                *existing = spec;
                Ok(())
            },
        )
    }
}

impl std::fmt::Debug for UpsertRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertRequest")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Trait for resource store backends
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource by key
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError>;

    /// Create or modify a resource, returning the stored result
    ///
    /// Applying a request whose outcome equals the stored spec leaves the
    /// resource version unchanged.
    async fn upsert(&self, request: UpsertRequest) -> Result<Resource, StoreError>;
}

struct Watcher {
    key: ResourceKey,
    tx: mpsc::Sender<ResourceKey>,
}

#[derive(Default)]
struct MemoryInner {
    resources: RwLock<HashMap<ResourceKey, Resource>>,
    watchers: Mutex<Vec<Watcher>>,
}

/// In-memory resource store
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes of `key`
    ///
    /// The receiver holds one event immediately so a consumer always
    /// evaluates the current state once before waiting.
    pub async fn watch(&self, key: ResourceKey) -> EventReceiver {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let _ = tx.try_send(key.clone());

        self.inner.watchers.lock().await.push(Watcher { key, tx });
        rx
    }

    /// Replace the spec stored under `key`
    pub async fn put(&self, key: ResourceKey, spec: ResourceSpec) -> Result<Resource, StoreError> {
        self.upsert(UpsertRequest::replace(key, spec)).await
    }

    /// All resources, ordered by key
    pub async fn list(&self) -> Vec<Resource> {
        let resources = self.inner.resources.read().await;
        let mut all: Vec<Resource> = resources.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Insert a previously persisted resource without notifying watchers
    async fn restore(&self, resource: Resource) {
        self.inner
            .resources
            .write()
            .await
            .insert(resource.key.clone(), resource);
    }

    async fn notify(&self, key: &ResourceKey) {
        let mut watchers = self.inner.watchers.lock().await;
        watchers.retain(|w| !w.tx.is_closed());

        for watcher in watchers.iter().filter(|w| &w.key == key) {
            // A full buffer already guarantees a wake-up.
            let _ = watcher.tx.try_send(key.clone());
        }
    }
}

impl MemoryStore {
    /// Apply an upsert, writing the result under `persist_dir` (if any)
    /// before it becomes visible in memory
    ///
    /// A failed write leaves the stored resource untouched, so a retry
    /// with the same request sees the change again.
    async fn apply(
        &self,
        request: UpsertRequest,
        persist_dir: Option<&Path>,
    ) -> Result<Resource, StoreError> {
        let UpsertRequest {
            key,
            initializer,
            mutator,
        } = request;

        let (stored, changed) = {
            let mut resources = self.inner.resources.write().await;

            let (resource, changed) = match resources.get(&key) {
                Some(existing) => {
                    let mut spec = existing.spec.clone();
                    mutator(&mut spec).map_err(|reason| StoreError::Rejected {
                        key: key.to_string(),
                        reason,
                    })?;
                    check_kind(&key, &spec)?;

                    if spec == existing.spec {
                        (existing.clone(), false)
                    } else {
                        let resource = Resource {
                            key: key.clone(),
                            version: existing.version + 1,
                            spec,
                        };
                        (resource, true)
                    }
                }
                None => {
                    let spec = initializer();
                    check_kind(&key, &spec)?;

                    let resource = Resource {
                        key: key.clone(),
                        version: 1,
                        spec,
                    };
                    (resource, true)
                }
            };

            if changed {
                if let Some(dir) = persist_dir {
                    persist(dir, &resource).await?;
                }
                resources.insert(key.clone(), resource.clone());
            }

            (resource, changed)
        };

        if changed {
            debug!(key = %key, version = stored.version, "Resource updated");
            self.notify(&key).await;
        }

        Ok(stored)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        Ok(self.inner.resources.read().await.get(key).cloned())
    }

    async fn upsert(&self, request: UpsertRequest) -> Result<Resource, StoreError> {
        self.apply(request, None).await
    }
}

fn check_kind(key: &ResourceKey, spec: &ResourceSpec) -> Result<(), StoreError> {
    if spec.kind() == key.kind {
        Ok(())
    } else {
        Err(StoreError::KindMismatch {
            key: key.to_string(),
            found: spec.kind().as_str(),
        })
    }
}

/// Resource store persisted as JSON files
///
/// Layout: `<dir>/<namespace>/<kind>/<escaped id>.json`. Reads are served
/// from memory; every changing upsert is written through to disk.
#[derive(Clone)]
pub struct FileStore {
    memory: MemoryStore,
    dir: PathBuf,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`, loading persisted resources
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;

        let memory = MemoryStore::new();
        let mut loaded = 0usize;

        for path in json_files(dir).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Resource>(&contents) {
                Ok(resource) => {
                    memory.restore(resource).await;
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable resource file");
                }
            }
        }

        debug!(dir = %dir.display(), loaded, "Opened resource store");

        Ok(Self {
            memory,
            dir: dir.to_path_buf(),
        })
    }

    /// In-memory view, used for watching and listing
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn resource_path(dir: &Path, key: &ResourceKey) -> PathBuf {
    dir.join(escape_component(&key.namespace))
        .join(key.kind.as_str())
        .join(format!("{}.json", escape_component(&key.id)))
}

/// Write `resource` under `dir` atomically (temp file then rename)
async fn persist(dir: &Path, resource: &Resource) -> Result<(), StoreError> {
    let path = resource_path(dir, &resource.key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_string_pretty(resource)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &path).await?;

    debug!(path = %path.display(), "Saved resource");
    Ok(())
}

#[async_trait]
impl ResourceStore for FileStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        self.memory.get(key).await
    }

    async fn upsert(&self, request: UpsertRequest) -> Result<Resource, StoreError> {
        self.memory.apply(request, Some(&self.dir)).await
    }
}

/// Make an id safe to use as a single path component
fn escape_component(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    escaped
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
