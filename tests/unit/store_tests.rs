//! Unit tests for the session store and snapshot persistence.

use session_relay::models::session::{HistoryEntry, Role};
use session_relay::store::SessionStore;

fn temp_store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("sessions.json"), 16, "sonnet".into())
}

#[tokio::test]
async fn create_if_absent_is_a_lookup_on_existing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    assert!(store.create_if_absent("a", "first label").await);
    store
        .with_session("a", |session| {
            session.history.push(HistoryEntry {
                role: Role::User,
                text: "hi".into(),
            });
        })
        .await
        .unwrap();

    // Second create with the same key must not produce a duplicate or
    // reset anything.
    assert!(!store.create_if_absent("a", "other label").await);
    let (label, history_len) = store
        .with_session("a", |session| (session.label.clone(), session.history.len()))
        .await
        .unwrap();
    assert_eq!(label, "first label");
    assert_eq!(history_len, 1);
}

#[tokio::test]
async fn remove_then_create_yields_a_fresh_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    store.create_if_absent("a", "a").await;
    store
        .with_session("a", |session| {
            session.history.push(HistoryEntry {
                role: Role::User,
                text: "hi".into(),
            });
        })
        .await
        .unwrap();

    assert!(store.remove("a").await.is_some());
    assert!(!store.contains("a").await);

    store.create_if_absent("a", "a").await;
    let history_len = store
        .with_session("a", |session| session.history.len())
        .await
        .unwrap();
    assert_eq!(history_len, 0, "brand-new record with empty history");
}

#[tokio::test]
async fn snapshot_round_trip_restores_persistent_fields_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    store.create_if_absent("a", "alpha").await;
    store
        .with_session("a", |session| {
            session.conversation_id = Some("conv-1".into());
            session.effort = "high".into();
            session.plan_mode = true;
            session.agent = Some("reviewer".into());
            session.history.push(HistoryEntry {
                role: Role::User,
                text: "hi".into(),
            });
            session.history.push(HistoryEntry {
                role: Role::Claude,
                text: "hello".into(),
            });
            // Transient state that must not survive a restore.
            session.pending_attachments.push("/tmp/x".into());
            session.relay.publish(session_relay::protocol::ServerEvent::Token {
                session_key: "a".into(),
                text: "buffered".into(),
            });
        })
        .await
        .unwrap();
    store.save().await;

    let reloaded = temp_store(&dir);
    assert_eq!(reloaded.load().await.unwrap(), 1);

    let checks = reloaded
        .with_session("a", |session| {
            (
                session.label.clone(),
                session.conversation_id.clone(),
                session.effort.clone(),
                session.plan_mode,
                session.agent.clone(),
                session.history.clone(),
                session.pending_attachments.len(),
                session.relay.buffered_len(),
                session.job.is_none(),
            )
        })
        .await
        .unwrap();

    assert_eq!(checks.0, "alpha");
    assert_eq!(checks.1.as_deref(), Some("conv-1"));
    assert_eq!(checks.2, "high");
    assert!(checks.3);
    assert_eq!(checks.4.as_deref(), Some("reviewer"));
    assert_eq!(checks.5.len(), 2);
    assert_eq!(checks.6, 0, "pending attachments reset on restore");
    assert_eq!(checks.7, 0, "replay buffer reset on restore");
    assert!(checks.8, "no process handle after restore");
}

#[tokio::test]
async fn save_replaces_the_snapshot_file_in_full() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);

    store.create_if_absent("a", "a").await;
    store.create_if_absent("b", "b").await;
    store.save().await;

    store.remove("a").await;
    store.save().await;

    let text = std::fs::read_to_string(dir.path().join("sessions.json")).unwrap();
    assert!(!text.contains("\"a\""), "removed session gone from snapshot");
    assert!(text.contains("\"b\""));
}

#[tokio::test]
async fn load_without_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    assert_eq!(store.load().await.unwrap(), 0);
    assert!(store.summaries().await.is_empty());
}

#[tokio::test]
async fn summaries_are_ordered_by_creation_time() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    store.create_if_absent("one", "one").await;
    store.create_if_absent("two", "two").await;
    store.create_if_absent("three", "three").await;

    let summaries = store.summaries().await;
    assert_eq!(summaries.len(), 3);
    for pair in summaries.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}
