//! Collection elements
//!
//! Collections are generic over [`RealtimeValue`], a cheap, cloneable handle to
//! a value living at some [`Node`]. [`Entity`] is the stock implementation: it
//! carries an optional in-memory value, encodes it through a
//! [`Representer`], and loads it from the backend on demand.

use crate::config::RealtimeContext;
use crate::models::{ItemRecord, Node};
use crate::representer::{CodingError, JsonRepresenter, Representer};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A handle to a value that can be a collection member
///
/// Clones share state, so binding or notifying one clone is visible through
/// every other.
pub trait RealtimeValue: Clone + Send + Sync + 'static {
    /// Build an unloaded handle for a member found in a collection index
    fn lazy(node: Node, item: &ItemRecord) -> Self;

    fn node(&self) -> Node;

    /// Re-home the handle, used when a detached element is saved into a collection
    fn bind(&self, node: Node);

    fn key(&self) -> String {
        self.node().key().to_string()
    }

    /// Tag copied into the item record
    fn raw(&self) -> Option<Value> {
        None
    }

    /// User payload copied into the item record
    fn payload(&self) -> Option<Map<String, Value>> {
        None
    }

    /// Primitive form staged when the element is stored inside its collection
    fn encode(&self) -> Result<Option<Value>, CodingError> {
        Ok(None)
    }

    fn did_save(&self) {}

    fn did_remove(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Not written by any transaction yet
    Local,
    Saved,
    Removed,
}

struct EntityState<T> {
    node: Node,
    value: Option<T>,
    raw: Option<Value>,
    payload: Option<Map<String, Value>>,
    status: EntityStatus,
}

pub struct Entity<T> {
    state: Arc<RwLock<EntityState<T>>>,
    representer: Arc<dyn Representer<T>>,
}

impl<T> Clone for Entity<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            representer: Arc::clone(&self.representer),
        }
    }
}

impl<T> Entity<T> {
    fn read(&self) -> RwLockReadGuard<'_, EntityState<T>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState<T>> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl<T> std::fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Entity")
            .field("node", &state.node)
            .field("loaded", &state.value.is_some())
            .field("status", &state.status)
            .finish()
    }
}

impl<T> Entity<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A new detached element with the given key
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self::with_representer(Node::detached(key), Some(value), JsonRepresenter::new())
    }

    /// A new detached element keyed by a backend-generated id
    pub fn with_generated_key(context: &RealtimeContext, value: T) -> Self {
        Self::new(context.generate_key(), value)
    }

    /// A reference to whatever is stored at `node`, loaded on demand
    pub fn at(node: Node) -> Self {
        Self::with_representer(node, None, JsonRepresenter::new())
    }
}

impl<T> Entity<T>
where
    T: Send + Sync + 'static,
{
    pub fn with_representer(
        node: Node,
        value: Option<T>,
        representer: impl Representer<T> + 'static,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(EntityState {
                node,
                value,
                raw: None,
                payload: None,
                status: EntityStatus::Local,
            })),
            representer: Arc::new(representer),
        }
    }

    pub fn with_raw(self, raw: Value) -> Self {
        self.write().raw = Some(raw);
        self
    }

    pub fn with_payload(self, payload: Map<String, Value>) -> Self {
        self.write().payload = Some(payload);
        self
    }

    pub fn status(&self) -> EntityStatus {
        self.read().status
    }

    pub fn is_loaded(&self) -> bool {
        self.read().value.is_some()
    }

    pub fn set(&self, value: T) {
        self.write().value = Some(value);
    }

    /// Same underlying element
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Read the value from the backend and cache it
    pub async fn load(&self, context: &RealtimeContext) -> anyhow::Result<()> {
        let node = self.read().node.clone();
        let snapshot = context
            .backend()
            .load(&node, context.config().load_timeout())
            .await
            .with_context(|| format!("Failed to load entity at {}", node))?;

        let value = if snapshot.exists() {
            Some(self.representer.decode(&snapshot)?)
        } else {
            None
        };
        tracing::debug!("Loaded entity at {} (exists: {})", node, value.is_some());
        self.write().value = value;
        Ok(())
    }
}

impl<T: Clone + Send + Sync + 'static> Entity<T> {
    pub fn value(&self) -> Option<T> {
        self.read().value.clone()
    }
}

impl<T> RealtimeValue for Entity<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn lazy(node: Node, item: &ItemRecord) -> Self {
        let entity = Self::at(node);
        {
            let mut state = entity.write();
            state.raw = item.raw.clone();
            state.payload = item.payload.clone();
            state.status = EntityStatus::Saved;
        }
        entity
    }

    fn node(&self) -> Node {
        self.read().node.clone()
    }

    fn bind(&self, node: Node) {
        self.write().node = node;
    }

    fn raw(&self) -> Option<Value> {
        self.read().raw.clone()
    }

    fn payload(&self) -> Option<Map<String, Value>> {
        self.read().payload.clone()
    }

    fn encode(&self) -> Result<Option<Value>, CodingError> {
        let state = self.read();
        match &state.value {
            Some(value) => self.representer.encode(value),
            None => Ok(None),
        }
    }

    fn did_save(&self) {
        self.write().status = EntityStatus::Saved;
    }

    fn did_remove(&self) {
        self.write().status = EntityStatus::Removed;
    }
}
