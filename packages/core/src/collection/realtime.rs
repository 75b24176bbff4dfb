//! Realtime Collection
//!
//! A remote-backed ordered collection. Every variant shares this engine and
//! differs only by its [`CollectionKind`].
//!
//! # Architecture
//!
//! ```text
//! RealtimeCollection ──┬── CollectionView     (ordered item records)
//!                      ├── CollectionStorage  (materialized elements)
//!                      └── Transaction        (staged writes, reversions)
//! ```
//!
//! A collection starts either rooted at a backend node, or standalone. A
//! standalone collection only accepts [`insert`](RealtimeCollection::insert)
//! and holds its elements in a staged list until
//! [`write_to`](RealtimeCollection::write_to) gives it a location.
//!
//! Rooted collections edit the view optimistically: `write` and `remove`
//! change the view and storage right away, stage the persisted form in a
//! transaction and register reversions that undo the local edit if the
//! transaction is reverted. If the view has not been loaded yet the edit is
//! deferred through a transaction precondition that loads it first.
//!
//! The persisted index lives in the link mirror of the collection node:
//!
//! ```text
//! /<links_key>/<collection path>/<items_key>/<member key>  = item record
//! /<links_key>/<element path>/<link_items_key>/<link id>   = link record
//! ```
//!
//! Reversions and completions capture only the shared state and the data
//! needed to undo one edit, never the collection handle itself.

use crate::collection::{
    CollectionError, CollectionKind, CollectionStorage, CollectionView, Linking, MemberEntry,
    Preparation, ViewChange,
};
use crate::config::RealtimeContext;
use crate::db::{DataEvent, DataSnapshot};
use crate::models::{ItemRecord, Node, RealtimeValue};
use crate::representer::CodingError;
use crate::transaction::Transaction;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub(crate) struct CollectionState<E> {
    node: Node,
    view: CollectionView,
    storage: CollectionStorage<E>,
    linking: Linking,
    /// Where key objects live, for keyed maps
    keys: Option<Node>,
}

struct Shared<E> {
    context: RealtimeContext,
    state: Arc<Mutex<CollectionState<E>>>,
    prepare_lock: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<ViewChange>,
}

pub struct RealtimeCollection<E, K> {
    shared: Arc<Shared<E>>,
    kind: PhantomData<fn() -> K>,
}

impl<E, K> Clone for RealtimeCollection<E, K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            kind: PhantomData,
        }
    }
}

impl<E: RealtimeValue, K: CollectionKind> std::fmt::Debug for RealtimeCollection<E, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RealtimeCollection")
            .field("kind", &K::NAME)
            .field("node", &state.node)
            .field("len", &state.view.len())
            .field("preparation", &state.view.preparation())
            .finish()
    }
}

/// Keeps a collection in sync with backend child events until dropped
#[derive(Debug)]
pub struct ObservationHandle {
    task: JoinHandle<()>,
}

impl ObservationHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock<E>(state: &Mutex<CollectionState<E>>) -> MutexGuard<'_, CollectionState<E>> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

impl<E: RealtimeValue> RealtimeCollection<E, crate::collection::ValuesKind> {
    /// A values array at `node`, or a standalone one if `node` is detached
    pub fn new(context: &RealtimeContext, node: Node) -> Self {
        Self::with_parts(context, node.clone(), node, None)
    }
}

impl<E: RealtimeValue> RealtimeCollection<E, crate::collection::ReferencesKind> {
    /// A reference array at `node` whose elements live under `elements`
    ///
    /// # Panics
    ///
    /// Panics if `elements` is not rooted.
    pub fn new(context: &RealtimeContext, node: Node, elements: Node) -> Self {
        assert!(
            elements.is_rooted(),
            "Referenced elements must live at a rooted node, got {}",
            elements
        );
        Self::with_parts(context, node, elements, None)
    }
}

impl<E: RealtimeValue> RealtimeCollection<E, crate::collection::LinkedKind> {
    /// A linked array at `node` whose elements live under `elements`
    ///
    /// # Panics
    ///
    /// Panics if `elements` is not rooted.
    pub fn new(context: &RealtimeContext, node: Node, elements: Node) -> Self {
        assert!(
            elements.is_rooted(),
            "Linked elements must live at a rooted node, got {}",
            elements
        );
        Self::with_parts(context, node, elements, None)
    }
}

impl<E: RealtimeValue, K: CollectionKind> RealtimeCollection<E, K> {
    pub(crate) fn with_parts(
        context: &RealtimeContext,
        node: Node,
        source: Node,
        keys: Option<Node>,
    ) -> Self {
        let view = if node.is_rooted() {
            CollectionView::new()
        } else {
            CollectionView::prepared()
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                context: context.clone(),
                state: Arc::new(Mutex::new(CollectionState {
                    node,
                    view,
                    storage: CollectionStorage::new(source),
                    linking: K::LINKING,
                    keys,
                })),
                prepare_lock: tokio::sync::Mutex::new(()),
                changes,
            }),
            kind: PhantomData,
        }
    }

    /// Use `builder` instead of [`RealtimeValue::lazy`] for members read from the index
    pub fn with_element_builder(
        self,
        builder: impl Fn(Node, &ItemRecord) -> E + Send + Sync + 'static,
    ) -> Self {
        self.lock_state().storage.set_builder(Arc::new(builder));
        self
    }

    pub(crate) fn set_linking(&self, linking: Linking) {
        self.lock_state().linking = linking;
    }

    fn lock_state(&self) -> MutexGuard<'_, CollectionState<E>> {
        lock(&self.shared.state)
    }

    pub fn context(&self) -> &RealtimeContext {
        &self.shared.context
    }

    pub fn kind_name(&self) -> &'static str {
        K::NAME
    }

    pub fn node(&self) -> Node {
        self.lock_state().node.clone()
    }

    pub fn is_rooted(&self) -> bool {
        self.lock_state().node.is_rooted()
    }

    /// Location of the persisted index
    ///
    /// # Panics
    ///
    /// Panics if the collection is not rooted.
    pub fn items_node(&self) -> Node {
        let config = self.shared.context.config();
        self.lock_state()
            .node
            .links_node(config)
            .child(&config.items_key)
    }

    /// Member count; staged members for a standalone collection
    pub fn len(&self) -> usize {
        let state = self.lock_state();
        if state.node.is_rooted() {
            state.view.len()
        } else {
            state.storage.staged().len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member keys in order
    pub fn keys(&self) -> Vec<String> {
        let state = self.lock_state();
        if state.node.is_rooted() {
            state.view.keys()
        } else {
            state.storage.staged().iter().map(|e| e.key.clone()).collect()
        }
    }

    /// Item records in view order
    pub fn items(&self) -> Vec<ItemRecord> {
        self.lock_state().view.iter().cloned().collect()
    }

    pub fn item(&self, index: usize) -> Option<ItemRecord> {
        self.lock_state().view.get(index).cloned()
    }

    /// The element at `index`, materialized lazily
    pub fn get(&self, index: usize) -> Option<E> {
        let mut state = self.lock_state();
        if !state.node.is_rooted() {
            return state.storage.staged().get(index).map(|e| e.element.clone());
        }
        let item = state.view.get(index)?.clone();
        Some(state.storage.object(&item))
    }

    pub fn elements(&self) -> Vec<E> {
        let mut state = self.lock_state();
        if !state.node.is_rooted() {
            return state
                .storage
                .staged()
                .iter()
                .map(|e| e.element.clone())
                .collect();
        }
        let items: Vec<ItemRecord> = state.view.iter().cloned().collect();
        items.iter().map(|item| state.storage.object(item)).collect()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        let state = self.lock_state();
        if state.node.is_rooted() {
            state.view.position(key)
        } else {
            state.storage.staged().iter().position(|e| e.key == key)
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn preparation(&self) -> Preparation {
        self.lock_state().view.preparation()
    }

    pub fn is_prepared(&self) -> bool {
        self.lock_state().view.is_prepared()
    }

    /// Local edits not yet confirmed by a commit
    pub fn has_changes(&self) -> bool {
        self.lock_state().view.has_changes()
    }

    /// Changes applied to the view from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.shared.changes.subscribe()
    }

    fn notify(&self, change: ViewChange) {
        if !change.is_empty() {
            // No receivers is fine
            let _ = self.shared.changes.send(change);
        }
    }

    /// Load the persisted index; a no-op once prepared
    ///
    /// # Panics
    ///
    /// Panics if the collection is not rooted.
    pub async fn prepare(&self) -> Result<(), CollectionError> {
        let _preparing = self.shared.prepare_lock.lock().await;

        let items_node = {
            let mut state = self.lock_state();
            assert!(
                state.node.is_rooted(),
                "Cannot prepare standalone collection {}",
                state.node
            );
            if state.view.is_prepared() {
                return Ok(());
            }
            state.view.set_preparation(Preparation::Preparing);
            let config = self.shared.context.config();
            state.node.links_node(config).child(&config.items_key)
        };

        let timeout = self.shared.context.config().load_timeout();
        let snapshot = match self.shared.context.backend().load(&items_node, timeout).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.lock_state()
                    .view
                    .set_preparation(Preparation::Unprepared);
                tracing::warn!("Failed to prepare collection at {}: {:#}", items_node, error);
                return Err(CollectionError::preparation_failed(&items_node, error));
            }
        };

        let change = {
            let mut state = self.lock_state();
            match state.view.apply(&snapshot, DataEvent::Value) {
                Ok(change) => {
                    state.view.set_preparation(Preparation::Prepared);
                    tracing::debug!(
                        "Prepared {} collection at {} with {} member(s)",
                        K::NAME,
                        state.node,
                        state.view.len()
                    );
                    change
                }
                Err(error) => {
                    state.view.set_preparation(Preparation::Unprepared);
                    return Err(error.into());
                }
            }
        };
        self.notify(change);
        Ok(())
    }

    /// Add `element` to a standalone collection, at the end unless `index` is given
    ///
    /// # Panics
    ///
    /// Panics if the collection is rooted, or if the element belongs to
    /// another container.
    pub fn insert(&self, element: E, index: Option<usize>) -> Result<(), CollectionError> {
        self.insert_entry(MemberEntry::for_element(element), index)
    }

    pub(crate) fn insert_entry(
        &self,
        entry: MemberEntry<E>,
        index: Option<usize>,
    ) -> Result<(), CollectionError> {
        let mut state = self.lock_state();
        assert!(
            !state.node.is_rooted(),
            "Collection at {} is rooted, use write instead of insert",
            state.node
        );
        Self::check_membership(&state, &entry);

        if state.storage.staged_contains(&entry.key) {
            return Err(CollectionError::already_inserted(entry.key));
        }
        let len = state.storage.staged().len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CollectionError::IndexOutOfRange { index, len });
        }
        state.storage.stage(entry, index);
        Ok(())
    }

    /// Write `element` into the collection, at the end unless `index` is given
    ///
    /// The write is staged in `transaction`, or in a new one that is returned.
    /// If the collection is not prepared yet the returned transaction carries
    /// a precondition that prepares it and then performs the write; errors
    /// such as a duplicate key are then reported by `commit`.
    ///
    /// # Panics
    ///
    /// Panics if the collection is not rooted, or if the element belongs to
    /// another container.
    pub fn write(
        &self,
        element: E,
        index: Option<usize>,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        self.write_entry(MemberEntry::for_element(element), index, transaction)
    }

    pub(crate) fn write_entry(
        &self,
        entry: MemberEntry<E>,
        index: Option<usize>,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        let transaction = self.transaction_for(transaction);
        if self.is_prepared() {
            self.write_prepared(entry, index, &transaction)?;
        } else {
            tracing::debug!(
                "Deferring write of '{}' until {} is prepared",
                entry.key,
                self.node()
            );
            let collection = self.clone();
            transaction.add_precondition(move |transaction| async move {
                collection.prepare().await?;
                collection.write_prepared(entry, index, &transaction)?;
                Ok(())
            });
        }
        Ok(transaction)
    }

    /// Remove the member at `index`
    ///
    /// # Panics
    ///
    /// Panics if the collection is not rooted.
    pub fn remove(
        &self,
        index: usize,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        let transaction = self.transaction_for(transaction);
        if self.is_prepared() {
            self.remove_prepared(index, &transaction)?;
        } else {
            tracing::debug!("Deferring removal at {} until {} is prepared", index, self.node());
            let collection = self.clone();
            transaction.add_precondition(move |transaction| async move {
                collection.prepare().await?;
                collection.remove_prepared(index, &transaction)?;
                Ok(())
            });
        }
        Ok(transaction)
    }

    /// Remove `element` wherever it is in the collection
    pub fn remove_element(
        &self,
        element: &E,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        self.remove_key(element.key(), transaction)
    }

    pub(crate) fn remove_key(
        &self,
        key: String,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        let transaction = self.transaction_for(transaction);
        if self.is_prepared() {
            let index = self
                .position(&key)
                .ok_or_else(|| CollectionError::member_not_found(&key))?;
            self.remove_prepared(index, &transaction)?;
        } else {
            let collection = self.clone();
            transaction.add_precondition(move |transaction| async move {
                collection.prepare().await?;
                let index = collection
                    .position(&key)
                    .ok_or_else(|| CollectionError::member_not_found(&key))?;
                collection.remove_prepared(index, &transaction)?;
                Ok(())
            });
        }
        Ok(transaction)
    }

    /// Give a standalone collection its location and write every staged member
    ///
    /// Staged members are written in order at indexes `0..n`. Reverting
    /// `transaction` makes the collection standalone again with its staged
    /// members restored. If an element fails to encode the error is returned
    /// and the caller should revert `transaction`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is detached or the collection is already rooted.
    pub fn write_to(&self, transaction: &Transaction, node: Node) -> Result<(), CollectionError> {
        assert!(
            node.is_rooted(),
            "Cannot write collection to detached node {}",
            node
        );
        let staged = {
            let mut state = self.lock_state();
            assert!(
                !state.node.is_rooted(),
                "Collection at {} is already rooted",
                state.node
            );
            let previous_node = std::mem::replace(&mut state.node, node.clone());
            let previous_source = state.storage.source().clone();
            if K::INLINE_ELEMENTS {
                state.storage.set_source(node.clone());
            }
            state.view = CollectionView::prepared();
            let staged = state.storage.take_staged();

            let state_ref = Arc::clone(&self.shared.state);
            let restored = staged.clone();
            transaction.add_reversion(move || {
                let mut state = lock(&state_ref);
                state.node = previous_node.clone();
                state.storage.set_source(previous_source.clone());
                state.view = CollectionView::prepared();
                for entry in &restored {
                    state.storage.remove(&entry.key);
                }
                state.storage.restore_staged(restored.clone());
            });
            staged
        };

        tracing::debug!(
            "Writing standalone {} collection to {} with {} member(s)",
            K::NAME,
            node,
            staged.len()
        );
        for (index, entry) in staged.into_iter().enumerate() {
            self.write_prepared(entry, Some(index), transaction)?;
        }
        Ok(())
    }

    /// Apply backend child events to the view until the handle is dropped
    ///
    /// Events arriving before the collection is prepared are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the collection is not rooted.
    pub fn run_observing(&self) -> ObservationHandle {
        let items_node = self.items_node();
        let backend = Arc::clone(self.shared.context.backend());
        let [added, removed, changed] = DataEvent::CHILD_EVENTS.map(|event| {
            backend
                .observe(&items_node, event)
                .map(move |snapshot| (event, snapshot))
        });
        let mut events = Box::pin(added.merge(removed).merge(changed));

        let collection = self.clone();
        let task = tokio::spawn(async move {
            while let Some((event, snapshot)) = events.next().await {
                if let Err(error) = collection.apply_remote(&snapshot, event) {
                    tracing::warn!(
                        "Ignoring undecodable {} at {}: {}",
                        event.event_type(),
                        snapshot.node(),
                        error
                    );
                }
            }
        });
        ObservationHandle { task }
    }

    fn apply_remote(&self, snapshot: &DataSnapshot, event: DataEvent) -> Result<(), CodingError> {
        let change = {
            let mut state = self.lock_state();
            if !state.view.is_prepared() {
                return Ok(());
            }
            let change = state.view.apply(snapshot, event)?;
            if event == DataEvent::ChildRemoved {
                state.storage.remove(snapshot.key());
            }
            change
        };
        self.notify(change);
        Ok(())
    }

    fn transaction_for(&self, transaction: Option<&Transaction>) -> Transaction {
        transaction
            .cloned()
            .unwrap_or_else(|| Transaction::new(&self.shared.context))
    }

    fn check_membership(state: &CollectionState<E>, entry: &MemberEntry<E>) {
        let element_node = entry.element.node();
        if K::INLINE_ELEMENTS {
            assert!(
                !element_node.is_rooted() || element_node.parent().as_ref() == Some(&state.node),
                "Element at {} already belongs to another container than {}",
                element_node,
                state.node
            );
        } else {
            let source = state.storage.source();
            assert!(
                element_node.is_rooted() && element_node.parent().as_ref() == Some(source),
                "Element at {} must be located in {}",
                element_node,
                source
            );
        }
    }

    fn write_prepared(
        &self,
        entry: MemberEntry<E>,
        index: Option<usize>,
        transaction: &Transaction,
    ) -> Result<(), CollectionError> {
        let config = self.shared.context.config();
        let mut state = self.lock_state();
        assert!(
            state.node.is_rooted(),
            "Cannot write into standalone collection {}",
            state.node
        );
        Self::check_membership(&state, &entry);

        let MemberEntry {
            key,
            element,
            key_object,
        } = entry;
        if state.view.contains_key(&key) {
            return Err(CollectionError::already_inserted(key));
        }
        let len = state.view.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CollectionError::IndexOutOfRange { index, len });
        }

        let element_node = if K::INLINE_ELEMENTS {
            state.node.child(&key)
        } else {
            element.node()
        };
        let encoded = if K::INLINE_ELEMENTS {
            element.encode()?
        } else {
            None
        };

        let items_node = state.node.links_node(config).child(&config.items_key);
        let item_node = items_node.child(&key);
        let link_id = (state.linking != Linking::None).then(|| self.shared.context.generate_key());

        let mut item = ItemRecord::new(&key)
            .with_raw(element.raw())
            .with_payload(element.payload());
        if let Some(link_id) = &link_id {
            item = item.with_link_id(link_id.clone());
        }

        let view_reversion = (!state.view.has_changes()).then(|| state.view.current_reversion());
        let shifted = state.view.insert(item.clone(), index);
        let record = state.view.get(index).cloned().unwrap_or(item);

        transaction.add_value(&item_node, record.to_value());
        for bumped in &shifted {
            transaction.add_value(&items_node.child(&bumped.record.key), bumped.record.to_value());
        }
        if let Some(value) = encoded {
            transaction.add_value(&element_node, value);
        }
        if let Some(link_id) = &link_id {
            let (link_node, link) =
                element_node.generate_link(link_id.clone(), &[item_node.clone()], config);
            transaction.add_link(&link_node, &link);

            if state.linking == Linking::KeyObject {
                let key_object = key_object
                    .or_else(|| state.keys.as_ref().map(|keys| keys.child(&key)))
                    .unwrap_or_else(|| panic!("Keyed entry '{}' has no key object", key));
                let (link_node, link) = key_object.generate_link(
                    link_id.clone(),
                    &[item_node.clone(), element_node.clone()],
                    config,
                );
                transaction.add_link(&link_node, &link);
            }
        }

        state.storage.store(&key, element.clone());

        let mut modified: Vec<usize> = shifted
            .iter()
            .filter_map(|bumped| state.view.position(&bumped.record.key))
            .collect();
        modified.sort_unstable();
        let change = ViewChange::Updated {
            deleted: Vec::new(),
            inserted: vec![index],
            modified,
            moved: Vec::new(),
        };
        tracing::debug!(
            "Staged write of '{}' at index {} in {} ({} record(s) shifted)",
            key,
            index,
            state.node,
            shifted.len()
        );
        drop(state);

        let state_ref = Arc::clone(&self.shared.state);
        let reverted_key = key;
        transaction.add_reversion(move || {
            let mut state = lock(&state_ref);
            match &view_reversion {
                Some(restore) if state.view.pending_changes() == 1 => restore(&mut state.view),
                _ => state.view.undo_insert(&reverted_key, &shifted),
            }
            state.view.settle();
            state.storage.remove(&reverted_key);
        });

        let state_ref = Arc::clone(&self.shared.state);
        transaction.add_completion(move |success| {
            if success {
                element.bind(element_node);
                element.did_save();
                lock(&state_ref).view.settle();
            }
        });

        self.notify(change);
        Ok(())
    }

    fn remove_prepared(&self, index: usize, transaction: &Transaction) -> Result<(), CollectionError> {
        let config = self.shared.context.config();
        let mut state = self.lock_state();
        assert!(
            state.node.is_rooted(),
            "Cannot remove from standalone collection {}",
            state.node
        );
        let len = state.view.len();
        if index >= len {
            return Err(CollectionError::IndexOutOfRange { index, len });
        }

        let view_reversion = (!state.view.has_changes()).then(|| state.view.current_reversion());
        let item = state.view.remove(index);
        let element = state.storage.object(&item);
        state.storage.remove(&item.key);

        let element_node = if K::INLINE_ELEMENTS {
            state.node.child(&item.key)
        } else {
            element.node()
        };
        let item_node = state
            .node
            .links_node(config)
            .child(&config.items_key)
            .child(&item.key);

        transaction.remove_value(&item_node);
        if K::INLINE_ELEMENTS {
            transaction.remove_value(&element_node);
        }
        if let Some(link_id) = &item.link_id {
            transaction.remove_value(&element_node.link_items_node(config).child(link_id));
            if state.linking == Linking::KeyObject {
                if let Some(keys) = &state.keys {
                    let key_object = keys.child(&item.key);
                    transaction.remove_value(&key_object.link_items_node(config).child(link_id));
                }
            }
        }
        tracing::debug!(
            "Staged removal of '{}' at index {} from {}",
            item.key,
            index,
            state.node
        );
        drop(state);

        let state_ref = Arc::clone(&self.shared.state);
        let restored = element.clone();
        transaction.add_reversion(move || {
            let mut state = lock(&state_ref);
            match &view_reversion {
                Some(restore) if state.view.pending_changes() == 1 => restore(&mut state.view),
                _ => state.view.undo_remove(item.clone(), index),
            }
            state.view.settle();
            state.storage.store(&item.key, restored.clone());
        });

        let state_ref = Arc::clone(&self.shared.state);
        transaction.add_completion(move |success| {
            if success {
                element.did_remove();
                lock(&state_ref).view.settle();
            }
        });

        self.notify(ViewChange::deleted(index));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{LinkedArray, References, Values};
    use crate::db::MemoryBackend;
    use crate::models::Entity;
    use serde_json::json;

    fn context() -> (Arc<MemoryBackend>, RealtimeContext) {
        let backend = Arc::new(MemoryBackend::new());
        let context = RealtimeContext::new(backend.clone());
        (backend, context)
    }

    #[tokio::test]
    async fn test_standalone_insert_keeps_staged_order() {
        let (_, context) = context();
        let values: Values<Entity<i32>> = Values::new(&context, Node::detached("list"));

        values.insert(Entity::new("a", 1), None).unwrap();
        values.insert(Entity::new("b", 2), Some(0)).unwrap();

        assert_eq!(values.keys(), vec!["b", "a"]);
        assert!(matches!(
            values.insert(Entity::new("a", 3), None),
            Err(CollectionError::AlreadyInserted { .. })
        ));
        assert!(matches!(
            values.insert(Entity::new("c", 3), Some(5)),
            Err(CollectionError::IndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[tokio::test]
    #[should_panic(expected = "use write instead of insert")]
    async fn test_insert_into_rooted_collection_panics() {
        let (_, context) = context();
        let values: Values<Entity<i32>> = Values::new(&context, Node::from_path("/list"));
        let _ = values.insert(Entity::new("a", 1), None);
    }

    #[tokio::test]
    #[should_panic(expected = "already belongs to another container")]
    async fn test_element_from_other_container_panics() {
        let (_, context) = context();
        let values: Values<Entity<i32>> = Values::new(&context, Node::detached("list"));
        let foreign = Entity::<i32>::at(Node::from_path("/other/a"));
        let _ = values.insert(foreign, None);
    }

    #[tokio::test]
    async fn test_write_stages_item_element_and_link() {
        let (_, context) = context();
        let values: Values<Entity<String>> = Values::new(&context, Node::from_path("/list"));
        values.prepare().await.unwrap();

        let transaction = values
            .write(Entity::new("e1", "hello".to_string()), None, None)
            .unwrap();
        let tree = transaction.staged();

        let item = tree
            .get(&Node::from_path("/__lnks/list/__itms/e1"))
            .expect("item record staged");
        let link_id = values.item(0).and_then(|item| item.link_id).unwrap();
        assert!(matches!(item, crate::transaction::UpdateNode::Value(_)));
        assert!(tree.get(&Node::from_path("/list/e1")).is_some());
        assert!(tree
            .get(&Node::from_path(&format!("/__lnks/list/e1/__l_itms/{}", link_id)))
            .is_some());

        transaction.cancel();
    }

    #[tokio::test]
    async fn test_reference_array_skips_linking_and_element_value() {
        let (backend, context) = context();
        backend.write_remote(&Node::from_path("/people/p1"), Some(json!("Ann")));
        let references: References<Entity<String>> = References::new(
            &context,
            Node::from_path("/team"),
            Node::from_path("/people"),
        );
        references.prepare().await.unwrap();

        let person = Entity::<String>::at(Node::from_path("/people/p1"));
        let transaction = references.write(person, None, None).unwrap();
        let tree = transaction.staged();

        assert_eq!(tree.len(), 1);
        assert!(references.item(0).unwrap().link_id.is_none());
        transaction.cancel();
    }

    #[tokio::test]
    #[should_panic(expected = "must be located in")]
    async fn test_linked_array_rejects_element_outside_source() {
        let (_, context) = context();
        let linked: LinkedArray<Entity<String>> = LinkedArray::new(
            &context,
            Node::from_path("/team"),
            Node::from_path("/people"),
        );
        linked.prepare().await.unwrap();
        let _ = linked.write(Entity::new("p1", "Ann".to_string()), None, None);
    }

    #[tokio::test]
    async fn test_write_broadcasts_insert_change() {
        let (_, context) = context();
        let values: Values<Entity<i32>> = Values::new(&context, Node::from_path("/list"));
        values.prepare().await.unwrap();
        let mut changes = values.subscribe();

        let transaction = values.write(Entity::new("a", 1), None, None).unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(
            change,
            ViewChange::Updated {
                deleted: vec![],
                inserted: vec![0],
                modified: vec![],
                moved: vec![],
            }
        );
        transaction.revert();
        assert!(values.is_empty());
    }
}
