//! In-memory Backend
//!
//! Keeps the whole database as one JSON tree and emits change events to
//! observers after each applied batch. Used by the test suites and by
//! applications that want the collection model without a remote store.
//!
//! # Failure injection
//!
//! - [`MemoryBackend::fail_next_commit`] rejects the next value commit
//! - [`MemoryBackend::fail_uploads_at`] rejects blob uploads at a node
//! - [`MemoryBackend::with_latency`] delays every round-trip
//!
//! Every successful commit is recorded and can be inspected with
//! [`MemoryBackend::commits`].

use crate::db::{Backend, BackendError, DataEvent, DataSnapshot, SnapshotStream};
use crate::models::Node;
use crate::transaction::{FileNode, Metadata, MutationTree};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Events buffered per observer before it starts lagging
const OBSERVER_CAPACITY: usize = 1024;

/// The value writes of one successful commit, in staging order
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub writes: Vec<(Node, Option<Value>)>,
}

impl CommitRecord {
    /// Last value written at `node` in this commit, `Some(None)` for a delete
    pub fn write_at(&self, node: &Node) -> Option<Option<&Value>> {
        self.writes
            .iter()
            .rev()
            .find(|(location, _)| location == node)
            .map(|(_, value)| value.as_ref())
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    metadata: Metadata,
}

#[derive(Default)]
struct FailurePlan {
    commits: VecDeque<String>,
    uploads: HashSet<Node>,
}

type ObserverKey = (Node, DataEvent);

#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<Map<String, Value>>,
    files: Mutex<HashMap<Node, StoredFile>>,
    observers: Mutex<HashMap<ObserverKey, broadcast::Sender<DataSnapshot>>>,
    commits: Mutex<Vec<CommitRecord>>,
    failures: Mutex<FailurePlan>,
    latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every commit, upload and load by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject the next value commit with `reason`
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        lock(&self.failures).commits.push_back(reason.into());
    }

    /// Reject every upload targeting `node`
    pub fn fail_uploads_at(&self, node: Node) {
        lock(&self.failures).uploads.insert(node);
    }

    /// Apply a write as if another client had committed it
    pub fn write_remote(&self, node: &Node, value: Option<Value>) {
        self.apply(vec![(node.clone(), value)]);
    }

    pub fn value_at(&self, node: &Node) -> Option<Value> {
        let data = self.data.read().unwrap_or_else(|p| p.into_inner());
        read_at(&data, node)
    }

    pub fn file_at(&self, node: &Node) -> Option<Vec<u8>> {
        lock(&self.files).get(node).map(|file| file.data.clone())
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        lock(&self.commits).clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.commits).len()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(&self, writes: Vec<(Node, Option<Value>)>) {
        let observed: HashSet<Node> = lock(&self.observers)
            .keys()
            .map(|(node, _)| node.clone())
            .collect();

        let (before, after) = {
            let mut data = self.data.write().unwrap_or_else(|p| p.into_inner());
            let before: HashMap<Node, Option<Value>> = observed
                .iter()
                .map(|node| (node.clone(), read_at(&data, node)))
                .collect();
            for (node, value) in writes {
                write_at(&mut data, &node, value);
            }
            let after: HashMap<Node, Option<Value>> = observed
                .iter()
                .map(|node| (node.clone(), read_at(&data, node)))
                .collect();
            (before, after)
        };

        self.notify(&before, &after);
    }

    fn notify(&self, before: &HashMap<Node, Option<Value>>, after: &HashMap<Node, Option<Value>>) {
        let mut observers = lock(&self.observers);
        observers.retain(|_, sender| sender.receiver_count() > 0);

        for ((node, event), sender) in observers.iter() {
            let (Some(old), Some(new)) = (before.get(node), after.get(node)) else {
                continue;
            };
            if old == new {
                continue;
            }

            for snapshot in changes_for(node, *event, old.as_ref(), new.as_ref()) {
                // No receivers left is not an error for a broadcast
                let _ = sender.send(snapshot);
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn commit(&self, tree: &MutationTree) -> Result<()> {
        self.simulate_latency().await;

        if let Some(reason) = lock(&self.failures).commits.pop_front() {
            tracing::debug!("Rejecting commit of {} writes: {}", tree.values().len(), reason);
            return Err(BackendError::commit_rejected(reason).into());
        }

        let writes: Vec<(Node, Option<Value>)> = tree
            .values()
            .into_iter()
            .map(|write| (write.location.clone(), write.value.clone()))
            .collect();
        tracing::debug!("Applying commit of {} writes", writes.len());

        self.apply(writes.clone());
        lock(&self.commits).push(CommitRecord { writes });
        Ok(())
    }

    async fn upload(&self, file: &FileNode) -> Result<Metadata> {
        self.simulate_latency().await;

        if lock(&self.failures).uploads.contains(&file.location) {
            return Err(BackendError::upload_rejected(&file.location, "injected failure").into());
        }

        let mut files = lock(&self.files);
        match &file.data {
            Some(data) => {
                let mut metadata = file.metadata.clone();
                metadata.insert("size".to_string(), Value::from(data.len()));
                metadata.insert(
                    "uploaded_at".to_string(),
                    Value::from(chrono::Utc::now().to_rfc3339()),
                );
                files.insert(
                    file.location.clone(),
                    StoredFile {
                        data: data.clone(),
                        metadata: metadata.clone(),
                    },
                );
                Ok(metadata)
            }
            None => Ok(files
                .remove(&file.location)
                .map(|removed| removed.metadata)
                .unwrap_or_default()),
        }
    }

    async fn load(&self, node: &Node, timeout: Duration) -> Result<DataSnapshot> {
        let read = async {
            self.simulate_latency().await;
            DataSnapshot::new(node.clone(), self.value_at(node))
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| BackendError::timeout(node, timeout).into())
    }

    fn observe(&self, node: &Node, event: DataEvent) -> SnapshotStream {
        let receiver = lock(&self.observers)
            .entry((node.clone(), event))
            .or_insert_with(|| broadcast::channel(OBSERVER_CAPACITY).0)
            .subscribe();

        let node = node.clone();
        Box::pin(
            BroadcastStream::new(receiver).filter_map(move |received| match received {
                Ok(snapshot) => Some(snapshot),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Observer of {} lagged, {} events skipped", node, skipped);
                    None
                }
            }),
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn read_at(data: &Map<String, Value>, node: &Node) -> Option<Value> {
    let Some((first, rest)) = node.segments().split_first() else {
        return Some(Value::Object(data.clone()));
    };
    let mut current = data.get(first)?;
    for key in rest {
        current = current.get(key)?;
    }
    Some(current.clone())
}

fn write_at(data: &mut Map<String, Value>, node: &Node, value: Option<Value>) {
    if node.segments().is_empty() {
        *data = match value {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        return;
    }
    write_path(data, node.segments(), value.filter(|value| !value.is_null()));
}

fn write_path(target: &mut Map<String, Value>, path: &[String], value: Option<Value>) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(value) => {
                target.insert(key.clone(), value);
            }
            None => {
                target.remove(key);
            }
        }
        return;
    }

    match value {
        Some(value) => {
            let entry = target
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                write_path(child, rest, Some(value));
            }
        }
        None => {
            if let Some(Value::Object(child)) = target.get_mut(key) {
                write_path(child, rest, None);
                if child.is_empty() {
                    target.remove(key);
                }
            }
        }
    }
}

fn children_of(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

fn changes_for(
    node: &Node,
    event: DataEvent,
    old: Option<&Value>,
    new: Option<&Value>,
) -> Vec<DataSnapshot> {
    if event == DataEvent::Value {
        return vec![DataSnapshot::new(node.clone(), new.cloned())];
    }

    let old_children = children_of(old);
    let new_children = children_of(new);
    match event {
        DataEvent::ChildAdded => new_children
            .iter()
            .filter(|(key, _)| !old_children.contains_key(*key))
            .map(|(key, value)| DataSnapshot::new(node.child(key), Some(value.clone())))
            .collect(),
        DataEvent::ChildRemoved => old_children
            .iter()
            .filter(|(key, _)| !new_children.contains_key(*key))
            .map(|(key, value)| DataSnapshot::new(node.child(key), Some(value.clone())))
            .collect(),
        DataEvent::ChildChanged => new_children
            .iter()
            .filter(|(key, value)| {
                old_children
                    .get(*key)
                    .is_some_and(|previous| previous != *value)
            })
            .map(|(key, value)| DataSnapshot::new(node.child(key), Some(value.clone())))
            .collect(),
        DataEvent::Value => Vec::new(),
    }
}
