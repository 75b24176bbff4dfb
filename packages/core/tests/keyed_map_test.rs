//! Keyed map tests
//!
//! Values stored inside the map, keyed by objects stored elsewhere, with
//! back-references kept on both sides.

#[cfg(test)]
mod keyed_map_tests {
    use anyhow::Result;
    use realtime_core::collection::{AnyCollection, KeyedMap};
    use realtime_core::db::MemoryBackend;
    use realtime_core::models::{Entity, EntityStatus, Node, RealtimeValue};
    use realtime_core::transaction::Transaction;
    use realtime_core::RealtimeContext;
    use serde_json::json;
    use std::sync::Arc;

    type Scores = KeyedMap<Entity<String>, Entity<u32>>;

    fn setup() -> (Arc<MemoryBackend>, RealtimeContext) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let backend = Arc::new(MemoryBackend::new());
        let context = RealtimeContext::new(backend.clone());
        (backend, context)
    }

    fn user(key: &str) -> Entity<String> {
        Entity::at(Node::from_path(&format!("/users/{}", key)))
    }

    fn scores(context: &RealtimeContext) -> Scores {
        Scores::new(context, Node::from_path("/scores"), Node::from_path("/users"))
    }

    #[tokio::test]
    async fn test_write_persists_value_and_both_links() -> Result<()> {
        let (backend, context) = setup();
        let scores = scores(&context);
        scores.prepare().await?;

        let ann = user("ann");
        let score = Entity::new("draft", 42_u32);
        scores.write(score.clone(), &ann, None)?.commit(true).await?;

        assert_eq!(backend.value_at(&Node::from_path("/scores/ann")), Some(json!(42)));
        assert_eq!(score.node(), Node::from_path("/scores/ann"));
        assert_eq!(score.status(), EntityStatus::Saved);

        let link_id = scores.values().item(0).and_then(|item| item.link_id).unwrap();
        assert_eq!(
            backend.value_at(&Node::from_path(&format!(
                "/__lnks/scores/ann/__l_itms/{}",
                link_id
            ))),
            Some(json!(["/__lnks/scores/__itms/ann"]))
        );
        assert_eq!(
            backend.value_at(&Node::from_path(&format!(
                "/__lnks/users/ann/__l_itms/{}",
                link_id
            ))),
            Some(json!(["/__lnks/scores/__itms/ann", "/scores/ann"]))
        );

        assert!(scores.contains(&ann));
        assert!(scores.get(&ann).is_some_and(|value| value.ptr_eq(&score)));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_by_key_deletes_value_and_links() -> Result<()> {
        let (backend, context) = setup();
        let scores = scores(&context);
        scores.prepare().await?;
        let ann = user("ann");
        let score = Entity::new("draft", 1_u32);
        scores.write(score.clone(), &ann, None)?.commit(true).await?;
        let link_id = scores.values().item(0).and_then(|item| item.link_id).unwrap();

        scores.remove(&ann, None)?.commit(true).await?;

        assert!(scores.is_empty());
        assert_eq!(score.status(), EntityStatus::Removed);
        assert_eq!(backend.value_at(&Node::from_path("/scores/ann")), None);
        assert_eq!(
            backend.value_at(&Node::from_path(&format!(
                "/__lnks/users/ann/__l_itms/{}",
                link_id
            ))),
            None
        );
        assert_eq!(backend.value_at(&Node::from_path("/__lnks")), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_an_error() -> Result<()> {
        let (_, context) = setup();
        let scores = scores(&context);
        scores.prepare().await?;

        let error = scores.remove(&user("nobody"), None).unwrap_err();
        assert!(error.to_string().contains("nobody"));
        Ok(())
    }

    #[tokio::test]
    async fn test_deferred_writes_on_unprepared_map() -> Result<()> {
        let (backend, context) = setup();
        backend.write_remote(
            &Node::from_path("/__lnks/scores/__itms/bob"),
            Some(json!({ "__i": 0 })),
        );
        backend.write_remote(&Node::from_path("/scores/bob"), Some(json!(7)));
        let scores = scores(&context);

        let transaction = Transaction::new(&context);
        scores.write(Entity::new("s", 9_u32), &user("ann"), Some(&transaction))?;
        assert!(!scores.is_prepared());
        assert_eq!(transaction.pending_preconditions(), 1);

        transaction.commit(true).await?;

        let keys: Vec<String> = scores.keys().iter().map(|key| key.key()).collect();
        assert_eq!(keys, vec!["bob", "ann"]);
        let (key, value) = scores.entry(0).unwrap();
        assert_eq!(key.node(), Node::from_path("/users/bob"));
        value.load(&context).await?;
        assert_eq!(value.value(), Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn test_standalone_map_written_later() -> Result<()> {
        let (backend, context) = setup();
        let scores = Scores::new(&context, Node::detached("draft"), Node::from_path("/users"));
        scores.insert(Entity::new("a", 1_u32), &user("ann"))?;
        scores.insert(Entity::new("b", 2_u32), &user("bob"))?;
        assert_eq!(AnyCollection::member_keys(&scores), vec!["ann", "bob"]);

        let transaction = Transaction::new(&context);
        scores.write_to(&transaction, Node::from_path("/seasons/s1/scores"))?;
        transaction.commit(true).await?;

        assert_eq!(
            backend.value_at(&Node::from_path("/seasons/s1/scores")),
            Some(json!({ "ann": 1, "bob": 2 }))
        );
        assert_eq!(scores.node(), Node::from_path("/seasons/s1/scores"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_leaves_map_unchanged() -> Result<()> {
        let (backend, context) = setup();
        let scores = scores(&context).unlinked();
        scores.prepare().await?;

        let transaction = scores.write(Entity::new("s", 3_u32), &user("ann"), None)?;
        assert!(scores.contains(&user("ann")));
        backend.fail_next_commit("offline");
        assert!(transaction.commit(true).await.is_err());

        assert!(scores.is_empty());
        assert_eq!(backend.commit_count(), 0);
        Ok(())
    }
}
