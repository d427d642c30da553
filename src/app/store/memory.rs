//! In-process document store
//!
//! `MemoryDocumentStore` keeps every collection in memory behind a single
//! async `RwLock`. Batches are staged against a working copy and only
//! applied once every write in the batch has succeeded, so a failing write
//! leaves the store untouched.
//!
//! Change notifications are emitted while the write lock is still held.
//! Two commits touching the same document therefore notify subscribers in
//! commit order.
//!
//! The store can be persisted to a JSON snapshot between runs, which lets
//! a later run see the records created by an earlier one.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Number, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::feed::{ChangeEvent, ChangeFeed, ChangeSender};
use super::query::{get_path, Query};
use super::{CreateOutcome, Document, DocumentStore, DocumentWrite, Increment, WriteOp};
use crate::app::models::Fields;
use crate::errors::{StoreError, StoreResult};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

/// In-memory [`DocumentStore`] with optional JSON snapshot persistence
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
    subscribers: Mutex<HashMap<String, Vec<ChangeSender>>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryDocumentStore {
    /// Create an empty, non-persistent store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file, loading it if present
    pub async fn open(snapshot_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let snapshot_path = snapshot_path.into();
        let collections = if tokio::fs::try_exists(&snapshot_path)
            .await
            .unwrap_or(false)
        {
            let content = tokio::fs::read(&snapshot_path)
                .await
                .map_err(|source| StoreError::Snapshot {
                    path: snapshot_path.clone(),
                    source,
                })?;
            let collections: Collections = serde_json::from_slice(&content)?;
            let documents: usize = collections.values().map(BTreeMap::len).sum();
            info!(
                "Loaded {} documents in {} collections from {}",
                documents,
                collections.len(),
                snapshot_path.display()
            );
            collections
        } else {
            debug!("No snapshot at {}, starting empty", snapshot_path.display());
            Collections::new()
        };

        Ok(Self {
            collections: RwLock::new(collections),
            subscribers: Mutex::new(HashMap::new()),
            snapshot_path: Some(snapshot_path),
        })
    }

    /// Snapshot file this store persists to, if any
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Persist to the snapshot file given at [`MemoryDocumentStore::open`]
    pub async fn save(&self) -> StoreResult<()> {
        match &self.snapshot_path {
            Some(path) => self.save_to(path).await,
            None => Ok(()),
        }
    }

    /// Persist all collections to `path` atomically
    pub async fn save_to(&self, path: &Path) -> StoreResult<()> {
        let bytes = {
            let collections = self.collections.read().await;
            serde_json::to_vec_pretty(&*collections)?
        };

        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .and_then(|inner| inner);

        result.map_err(|source| StoreError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Names of all non-empty collections
    pub async fn collection_names(&self) -> Vec<String> {
        self.collections
            .read()
            .await
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Deliver an event to every live subscriber of its collection
    fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(senders) = subscribers.get_mut(&event.collection) {
            senders.retain(|sender| sender.send(event.clone()));
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(docs
            .iter()
            .filter(|(_, data)| query.matches(data))
            .take(limit)
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let timestamp = server_time();
        let mut collections = self.collections.write().await;

        // Stage every write against a working copy first.
        let mut working: HashMap<(String, String), Option<Fields>> = HashMap::new();
        let mut events = Vec::with_capacity(writes.len());
        for write in &writes {
            let key = (write.collection.clone(), write.id.clone());
            let before = match working.get(&key) {
                Some(staged) => staged.clone(),
                None => collections
                    .get(&write.collection)
                    .and_then(|docs| docs.get(&write.id))
                    .cloned(),
            };
            let after = apply_write(before.clone(), write, &timestamp)?;
            working.insert(key, after.clone());

            if before.is_some() || after.is_some() {
                events.push(ChangeEvent {
                    event_id: new_event_id(),
                    collection: write.collection.clone(),
                    id: write.id.clone(),
                    before,
                    after,
                });
            }
        }

        for ((collection, id), doc) in working {
            match doc {
                Some(data) => {
                    collections.entry(collection).or_default().insert(id, data);
                }
                None => {
                    if let Some(docs) = collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }

        debug!("Committed batch of {} writes", writes.len());
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        mut data: Fields,
        server_timestamps: &[&str],
    ) -> StoreResult<CreateOutcome> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = docs.get(id) {
            return Ok(CreateOutcome::Existing(Document {
                id: id.to_string(),
                data: existing.clone(),
            }));
        }

        let timestamp = server_time();
        for path in server_timestamps {
            set_path(&mut data, path, Value::String(timestamp.clone()))?;
        }
        docs.insert(id.to_string(), data.clone());

        self.emit(ChangeEvent {
            event_id: new_event_id(),
            collection: collection.to_string(),
            id: id.to_string(),
            before: None,
            after: Some(data.clone()),
        });

        Ok(CreateOutcome::Created(Document {
            id: id.to_string(),
            data,
        }))
    }

    fn subscribe(&self, collection: &str) -> ChangeFeed {
        let (sender, feed) = ChangeFeed::channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        feed
    }
}

/// Random 128-bit id; stays unique across snapshot reloads
fn new_event_id() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

/// Current time in the format used for server timestamps
fn server_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn apply_write(
    current: Option<Fields>,
    write: &DocumentWrite,
    timestamp: &str,
) -> StoreResult<Option<Fields>> {
    let mut next = match &write.op {
        WriteOp::Set { data, merge: false } => data.clone(),
        WriteOp::Create { data } => {
            if current.is_some() {
                return Err(StoreError::AlreadyExists {
                    collection: write.collection.clone(),
                    id: write.id.clone(),
                });
            }
            data.clone()
        }
        WriteOp::Set { data, merge: true } => {
            let mut base = current.unwrap_or_default();
            deep_merge(&mut base, data);
            base
        }
        WriteOp::Update { fields } => {
            let mut base = current.ok_or_else(|| StoreError::NotFound {
                collection: write.collection.clone(),
                id: write.id.clone(),
            })?;
            for (path, value) in fields {
                match value {
                    Some(value) => set_path(&mut base, path, value.clone())?,
                    None => remove_path(&mut base, path)?,
                }
            }
            base
        }
        WriteOp::Increment { deltas } => {
            let mut base = current.unwrap_or_default();
            for (path, delta) in deltas {
                let value = incremented(get_path(&base, path), *delta).ok_or_else(|| {
                    StoreError::NonFinite {
                        collection: write.collection.clone(),
                        id: write.id.clone(),
                        path: path.clone(),
                    }
                })?;
                set_path(&mut base, path, value)?;
            }
            base
        }
        WriteOp::Delete => return Ok(None),
    };

    for path in &write.server_timestamps {
        set_path(&mut next, path, Value::String(timestamp.to_string()))?;
    }
    Ok(Some(next))
}

/// Add `delta` to `current`; non-numeric or missing values count as zero
fn incremented(current: Option<&Value>, delta: Increment) -> Option<Value> {
    let current = match current {
        Some(Value::Number(n)) => Some(n),
        _ => None,
    };
    match (current, delta) {
        (None, Increment::Int(d)) => Some(Value::from(d)),
        (Some(n), Increment::Int(d)) if n.is_i64() || n.is_u64() => match n.as_i64() {
            Some(v) => match v.checked_add(d) {
                Some(sum) => Some(Value::from(sum)),
                None => Number::from_f64(v as f64 + d as f64).map(Value::Number),
            },
            None => Number::from_f64(n.as_f64()? + d as f64).map(Value::Number),
        },
        (Some(n), Increment::Int(d)) => Number::from_f64(n.as_f64()? + d as f64).map(Value::Number),
        (None, Increment::Float(d)) => Number::from_f64(d).map(Value::Number),
        (Some(n), Increment::Float(d)) => Number::from_f64(n.as_f64()? + d).map(Value::Number),
    }
}

fn split_path(path: &str) -> StoreResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

/// Set a dotted path, creating (or replacing non-object) intermediates
fn set_path(data: &mut Fields, path: &str, value: Value) -> StoreResult<()> {
    let segments = split_path(path)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::InvalidPath {
            path: path.to_string(),
        })?;

    let mut current = data;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !slot.is_object() {
            *slot = Value::Object(Fields::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                })
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Remove a dotted path; missing intermediates are not an error
fn remove_path(data: &mut Fields, path: &str) -> StoreResult<()> {
    let segments = split_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let mut current = data;
    for segment in parents {
        current = match current.get_mut(*segment) {
            Some(Value::Object(map)) => map,
            _ => return Ok(()),
        };
    }
    current.remove(*last);
    Ok(())
}

fn deep_merge(base: &mut Fields, patch: &Fields) {
    for (key, value) in patch {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        warn!("Failed to move snapshot into place: {}", e.error);
        e.error
    })?;
    Ok(())
}
