//! Keyed Map
//!
//! Values stored inside the map node, each keyed by an object that lives
//! elsewhere under a keys node. The member key of an entry is the key
//! object's key, so a value is persisted at `<map>/<key object key>`.
//!
//! Writing an entry links the value back to its item record and, unless the
//! map is [`unlinked`](KeyedMap::unlinked), records the entry under the key
//! object's own link items too.

use crate::collection::{
    CollectionError, Linking, MapKind, MemberEntry, ObservationHandle, RealtimeCollection,
    ViewChange,
};
use crate::config::RealtimeContext;
use crate::models::{ItemRecord, Node, RealtimeValue};
use crate::transaction::Transaction;
use std::marker::PhantomData;
use tokio::sync::broadcast;

pub struct KeyedMap<K, V> {
    values: RealtimeCollection<V, MapKind>,
    keys: Node,
    key_type: PhantomData<fn() -> K>,
}

impl<K, V> Clone for KeyedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            keys: self.keys.clone(),
            key_type: PhantomData,
        }
    }
}

impl<K: RealtimeValue, V: RealtimeValue> std::fmt::Debug for KeyedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMap")
            .field("values", &self.values)
            .field("keys", &self.keys)
            .finish()
    }
}

impl<K: RealtimeValue, V: RealtimeValue> KeyedMap<K, V> {
    /// A map at `node` whose key objects live under `keys`
    ///
    /// # Panics
    ///
    /// Panics if `keys` is not rooted.
    pub fn new(context: &RealtimeContext, node: Node, keys: Node) -> Self {
        assert!(
            keys.is_rooted(),
            "Key objects must live at a rooted node, got {}",
            keys
        );
        Self {
            values: RealtimeCollection::with_parts(context, node.clone(), node, Some(keys.clone())),
            keys,
            key_type: PhantomData,
        }
    }

    /// Do not record entries under the key objects' link items
    pub fn unlinked(self) -> Self {
        self.values.set_linking(Linking::Element);
        self
    }

    pub fn with_value_builder(
        self,
        builder: impl Fn(Node, &ItemRecord) -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            values: self.values.with_element_builder(builder),
            ..self
        }
    }

    /// The underlying value collection
    pub fn values(&self) -> &RealtimeCollection<V, MapKind> {
        &self.values
    }

    pub fn keys_node(&self) -> &Node {
        &self.keys
    }

    pub fn node(&self) -> Node {
        self.values.node()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_prepared(&self) -> bool {
        self.values.is_prepared()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.values.subscribe()
    }

    pub async fn prepare(&self) -> Result<(), CollectionError> {
        self.values.prepare().await
    }

    fn entry_for(&self, value: V, key: &K) -> MemberEntry<V> {
        let key_node = key.node();
        assert!(
            key_node.parent().as_ref() == Some(&self.keys),
            "Key object at {} must be located in {}",
            key_node,
            self.keys
        );
        MemberEntry {
            key: key_node.key().to_string(),
            element: value,
            key_object: Some(key_node),
        }
    }

    fn key_object(&self, key: &str) -> K {
        let node = self.keys.child(key);
        K::lazy(node, &ItemRecord::new(key))
    }

    /// Key objects in map order
    pub fn keys(&self) -> Vec<K> {
        self.values
            .keys()
            .iter()
            .map(|key| self.key_object(key))
            .collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.values.contains_key(&key.key())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let index = self.values.position(&key.key())?;
        self.values.get(index)
    }

    /// Key object and value at `index`
    pub fn entry(&self, index: usize) -> Option<(K, V)> {
        let key = self.values.keys().get(index)?.clone();
        let value = self.values.get(index)?;
        Some((self.key_object(&key), value))
    }

    /// Stage `value` for `key` in a standalone map
    ///
    /// # Panics
    ///
    /// Panics if the map is rooted, or if `key` is not located under the keys node.
    pub fn insert(&self, value: V, key: &K) -> Result<(), CollectionError> {
        let entry = self.entry_for(value, key);
        self.values.insert_entry(entry, None)
    }

    /// Write `value` for `key`, in `transaction` or a new one
    ///
    /// # Panics
    ///
    /// Panics if the map is not rooted, or if `key` is not located under the keys node.
    pub fn write(
        &self,
        value: V,
        key: &K,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        let entry = self.entry_for(value, key);
        self.values.write_entry(entry, None, transaction)
    }

    pub fn remove(
        &self,
        key: &K,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        self.values.remove_key(key.key(), transaction)
    }

    pub fn write_to(&self, transaction: &Transaction, node: Node) -> Result<(), CollectionError> {
        self.values.write_to(transaction, node)
    }

    pub fn run_observing(&self) -> ObservationHandle {
        self.values.run_observing()
    }
}
