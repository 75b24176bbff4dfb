//! Type-erased collections
//!
//! [`AnyCollection`] lets callers keep collections of different element
//! types and variants side by side, e.g. every collection owned by one
//! record, behind `Arc<dyn AnyCollection>`.

use crate::collection::{CollectionError, CollectionKind, KeyedMap, RealtimeCollection};
use crate::models::{Node, RealtimeValue};
use crate::transaction::Transaction;
use async_trait::async_trait;

#[async_trait]
pub trait AnyCollection: Send + Sync {
    fn node(&self) -> Node;

    /// Variant name, e.g. `"values"` or `"keyed_map"`
    fn kind_name(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_prepared(&self) -> bool;

    /// Member keys in order
    fn member_keys(&self) -> Vec<String>;

    async fn prepare(&self) -> Result<(), CollectionError>;

    fn remove_at(
        &self,
        index: usize,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError>;
}

#[async_trait]
impl<E: RealtimeValue, K: CollectionKind> AnyCollection for RealtimeCollection<E, K> {
    fn node(&self) -> Node {
        RealtimeCollection::node(self)
    }

    fn kind_name(&self) -> &'static str {
        K::NAME
    }

    fn len(&self) -> usize {
        RealtimeCollection::len(self)
    }

    fn is_prepared(&self) -> bool {
        RealtimeCollection::is_prepared(self)
    }

    fn member_keys(&self) -> Vec<String> {
        RealtimeCollection::keys(self)
    }

    async fn prepare(&self) -> Result<(), CollectionError> {
        RealtimeCollection::prepare(self).await
    }

    fn remove_at(
        &self,
        index: usize,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        RealtimeCollection::remove(self, index, transaction)
    }
}

#[async_trait]
impl<K: RealtimeValue, V: RealtimeValue> AnyCollection for KeyedMap<K, V> {
    fn node(&self) -> Node {
        KeyedMap::node(self)
    }

    fn kind_name(&self) -> &'static str {
        self.values().kind_name()
    }

    fn len(&self) -> usize {
        KeyedMap::len(self)
    }

    fn is_prepared(&self) -> bool {
        KeyedMap::is_prepared(self)
    }

    fn member_keys(&self) -> Vec<String> {
        self.values().keys()
    }

    async fn prepare(&self) -> Result<(), CollectionError> {
        KeyedMap::prepare(self).await
    }

    fn remove_at(
        &self,
        index: usize,
        transaction: Option<&Transaction>,
    ) -> Result<Transaction, CollectionError> {
        self.values().remove(index, transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{References, Values};
    use crate::config::RealtimeContext;
    use crate::db::MemoryBackend;
    use crate::models::Entity;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_heterogeneous_collections_behind_trait_objects() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write_remote(
            &Node::from_path("/__lnks/tags/__itms/t1"),
            Some(json!({ "__i": 0 })),
        );
        let context = RealtimeContext::new(backend);

        let collections: Vec<Arc<dyn AnyCollection>> = vec![
            Arc::new(Values::<Entity<String>>::new(&context, Node::from_path("/tags"))),
            Arc::new(References::<Entity<String>>::new(
                &context,
                Node::from_path("/team"),
                Node::from_path("/people"),
            )),
            Arc::new(KeyedMap::<Entity<String>, Entity<u32>>::new(
                &context,
                Node::from_path("/scores"),
                Node::from_path("/users"),
            )),
        ];

        for collection in &collections {
            collection.prepare().await.unwrap();
            assert!(collection.is_prepared());
        }

        let kinds: Vec<_> = collections.iter().map(|c| c.kind_name()).collect();
        assert_eq!(kinds, vec!["values", "references", "keyed_map"]);
        assert_eq!(collections[0].member_keys(), vec!["t1"]);
        assert!(collections[1].is_empty());

        let transaction = collections[0].remove_at(0, None).unwrap();
        transaction.commit(true).await.unwrap();
        assert!(collections[0].is_empty());
    }
}
