//! Collection Storage
//!
//! Materialized elements keyed by member key. Confirmed elements are built
//! lazily from their item record the first time they are asked for; staged
//! entries belong to a collection that has not been written anywhere yet and
//! have no position in the view until it is.

use crate::models::{ItemRecord, Node, RealtimeValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an unloaded element for a member found in the index
pub type ElementBuilder<E> = Arc<dyn Fn(Node, &ItemRecord) -> E + Send + Sync>;

/// An element together with the key it is stored under
#[derive(Debug, Clone)]
pub struct MemberEntry<E> {
    pub key: String,
    pub element: E,
    /// Location of the key object, for keyed maps
    pub key_object: Option<Node>,
}

impl<E: RealtimeValue> MemberEntry<E> {
    pub fn for_element(element: E) -> Self {
        Self {
            key: element.key(),
            element,
            key_object: None,
        }
    }
}

pub struct CollectionStorage<E> {
    source: Node,
    elements: HashMap<String, E>,
    staged: Vec<MemberEntry<E>>,
    builder: ElementBuilder<E>,
}

impl<E: RealtimeValue> CollectionStorage<E> {
    pub fn new(source: Node) -> Self {
        Self::with_builder(source, Arc::new(E::lazy))
    }

    pub fn with_builder(source: Node, builder: ElementBuilder<E>) -> Self {
        Self {
            source,
            elements: HashMap::new(),
            staged: Vec::new(),
            builder,
        }
    }

    /// Where lazily built elements are located
    pub fn source(&self) -> &Node {
        &self.source
    }

    pub(crate) fn set_source(&mut self, source: Node) {
        self.source = source;
    }

    pub(crate) fn set_builder(&mut self, builder: ElementBuilder<E>) {
        self.builder = builder;
    }

    /// The confirmed element for `item`, built and cached on first access
    pub fn object(&mut self, item: &ItemRecord) -> E {
        if let Some(element) = self.elements.get(&item.key) {
            return element.clone();
        }
        let element = self.build(item);
        self.elements.insert(item.key.clone(), element.clone());
        element
    }

    /// A fresh element for `item`, not cached
    pub fn build(&self, item: &ItemRecord) -> E {
        (self.builder)(self.source.child(&item.key), item)
    }

    pub fn get(&self, key: &str) -> Option<&E> {
        self.elements.get(key)
    }

    pub fn store(&mut self, key: impl Into<String>, element: E) {
        self.elements.insert(key.into(), element);
    }

    pub fn remove(&mut self, key: &str) -> Option<E> {
        self.elements.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.elements.contains_key(key)
    }

    pub fn confirmed_len(&self) -> usize {
        self.elements.len()
    }

    pub fn staged(&self) -> &[MemberEntry<E>] {
        &self.staged
    }

    pub fn staged_contains(&self, key: &str) -> bool {
        self.staged.iter().any(|entry| entry.key == key)
    }

    /// # Panics
    ///
    /// Panics if `index` is past the end of the staged list.
    pub fn stage(&mut self, entry: MemberEntry<E>, index: usize) {
        self.staged.insert(index, entry);
    }

    pub(crate) fn take_staged(&mut self) -> Vec<MemberEntry<E>> {
        std::mem::take(&mut self.staged)
    }

    pub(crate) fn restore_staged(&mut self, staged: Vec<MemberEntry<E>>) {
        self.staged = staged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_object_builds_lazily_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let mut storage: CollectionStorage<Entity<String>> = CollectionStorage::with_builder(
            Node::from_path("/list"),
            Arc::new(move |node, item| {
                counter.fetch_add(1, Ordering::SeqCst);
                Entity::lazy(node, item)
            }),
        );

        let item = ItemRecord::new("e1");
        let first = storage.object(&item);
        let second = storage.object(&item);

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(first.ptr_eq(&second));
        assert_eq!(first.node(), Node::from_path("/list/e1"));
        assert!(!first.is_loaded());
        assert!(storage.contains("e1"));
    }

    #[test]
    fn test_store_and_remove_confirmed() {
        let mut storage = CollectionStorage::new(Node::from_path("/list"));
        let element = Entity::new("e1", 1_u8);

        storage.store("e1", element.clone());
        assert!(storage.get("e1").is_some_and(|stored| stored.ptr_eq(&element)));

        let removed = storage.remove("e1").unwrap();
        assert!(removed.ptr_eq(&element));
        assert_eq!(storage.confirmed_len(), 0);
    }

    #[test]
    fn test_staged_entries_keep_order() {
        let mut storage = CollectionStorage::new(Node::detached("list"));
        storage.stage(MemberEntry::for_element(Entity::new("a", 1_u8)), 0);
        storage.stage(MemberEntry::for_element(Entity::new("b", 2_u8)), 0);
        storage.stage(MemberEntry::for_element(Entity::new("c", 3_u8)), 2);

        let keys: Vec<_> = storage.staged().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert!(storage.staged_contains("c"));

        let taken = storage.take_staged();
        assert!(storage.staged().is_empty());
        storage.restore_staged(taken);
        assert_eq!(storage.staged().len(), 3);
    }
}
