//! Repository Integration Tests
//!
//! Tests for the local tables with in-memory and on-disk SQLite databases.

#[cfg(test)]
mod tests {
    use crate::domain::{NewTask, OutboxAction, OutboxEntry, Tag, Task};
    use crate::error::StoreError;
    use crate::repository::{LocalStore, Repository};
    use serde_json::json;

    async fn setup_test_db() -> LocalStore {
        let store = LocalStore::in_memory();
        store.open().await.expect("Failed to init test DB");
        store
    }

    fn task(id: &str, title: &str) -> Task {
        Task::new_local(id.to_string(), &NewTask::titled(title), "test", "2024-01-01T00:00:00Z")
    }

    fn tag(id: &str, name: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: name.to_string(),
            color: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_task() {
        let store = setup_test_db().await;

        store.tasks.put(&task("a", "Buy milk")).await.unwrap();

        let found = store.tasks.get("a").await.expect("Find failed");
        assert_eq!(found.unwrap().title, "Buy milk");
        assert!(store.tasks.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing() {
        let store = setup_test_db().await;

        let mut t = task("a", "Original");
        store.tasks.put(&t).await.unwrap();
        t.title = "Updated".to_string();
        t.version = 2;
        store.tasks.put(&t).await.unwrap();

        let all = store.tasks.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Updated");
        assert_eq!(all[0].version, 2);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let store = setup_test_db().await;

        store.tasks.put(&task("a", "To delete")).await.unwrap();
        store.tasks.delete("a").await.expect("Delete failed");

        assert!(store.tasks.get("a").await.unwrap().is_none());
        // Deleting again is not an error
        store.tasks.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_all_drops_missing_rows() {
        let store = setup_test_db().await;

        store
            .tasks
            .put_all(&[task("a", "A"), task("b", "B")])
            .await
            .unwrap();
        store
            .tasks
            .replace_all(&[task("c", "C"), task("b", "B2")])
            .await
            .unwrap();

        let all = store.tasks.get_all().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(all[1].title, "B2");
    }

    #[tokio::test]
    async fn test_list_by_completed() {
        let store = setup_test_db().await;

        let mut done = task("done", "Done");
        done.completed = true;
        store
            .tasks
            .put_all(&[task("open", "Open"), done])
            .await
            .unwrap();

        let completed = store.tasks.list_by_completed(true).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "done");

        let incomplete = store.tasks.list_by_completed(false).await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, "open");
    }

    #[tokio::test]
    async fn test_tags_replace_and_clear() {
        let store = setup_test_db().await;

        store.tags.put(&tag("t1", "Work")).await.unwrap();
        store
            .tags
            .replace_all(&[tag("t2", "Home")])
            .await
            .unwrap();
        let all = store.tags.get_all().await.unwrap();
        assert_eq!(all, vec![tag("t2", "Home")]);

        store.tags.clear().await.unwrap();
        assert!(store.tags.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outbox_is_fifo() {
        let store = setup_test_db().await;

        let first = OutboxEntry::new(OutboxAction::Create, "a", Some(json!({"title": "A"})), 5);
        let second = OutboxEntry::new(OutboxAction::Update, "a", Some(json!({"title": "A2"})), 1);
        let third = OutboxEntry::new(OutboxAction::Delete, "b", None, 3);
        for entry in [&first, &second, &third] {
            store.outbox.enqueue(entry).await.unwrap();
        }

        // Enqueue order wins over timestamps and ids
        let entries = store.outbox.list().await.unwrap();
        assert_eq!(entries, vec![first.clone(), second.clone(), third.clone()]);

        store.outbox.remove(&second.id).await.unwrap();
        store.outbox.increment_retries(&first.id).await.unwrap();

        let entries = store.outbox.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[0].retries, 1);
        assert_eq!(entries[1].id, third.id);
        assert!(entries[1].payload.is_none());
        assert_eq!(store.outbox.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_last_sync_defaults_to_zero() {
        let store = setup_test_db().await;

        assert_eq!(store.sync_state.load().await.unwrap().last_sync, 0);
        store.sync_state.set_last_sync(1_700_000_000_000).await.unwrap();
        store.sync_state.set_last_sync(1_700_000_000_500).await.unwrap();
        assert_eq!(store.sync_state.load().await.unwrap().last_sync, 1_700_000_000_500);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = setup_test_db().await;

        store.tasks.put(&task("a", "A")).await.unwrap();
        store.tags.put(&tag("t", "T")).await.unwrap();
        store
            .outbox
            .enqueue(&OutboxEntry::new(OutboxAction::Delete, "a", None, 1))
            .await
            .unwrap();
        store.sync_state.set_last_sync(42).await.unwrap();

        store.clear_all().await.unwrap();

        assert!(store.tasks.get_all().await.unwrap().is_empty());
        assert!(store.tags.get_all().await.unwrap().is_empty());
        assert_eq!(store.outbox.len().await.unwrap(), 0);
        assert_eq!(store.sync_state.load().await.unwrap().last_sync, 0);
    }

    #[tokio::test]
    async fn test_outbox_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haboard.db");
        let entry = OutboxEntry::new(OutboxAction::Update, "a", Some(json!({"priority": 2})), 7);

        {
            let store = LocalStore::new(&path);
            store.open().await.unwrap();
            store.outbox.enqueue(&entry).await.unwrap();
            store.close().await;
        }

        let store = LocalStore::new(&path);
        store.open().await.unwrap();
        assert_eq!(store.outbox.list().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = setup_test_db().await;
        store.close().await;

        assert!(matches!(
            store.tasks.get_all().await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.outbox.enqueue(&OutboxEntry::new(OutboxAction::Delete, "a", None, 1)).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }
}
