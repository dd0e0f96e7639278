//! Integration tests for replay across detach/reattach, driven through
//! the store the way the gateway drives it.

use tokio::sync::mpsc;

use session_relay::protocol::ServerEvent;
use session_relay::relay::Channel;
use session_relay::store::SessionStore;

fn token(n: usize) -> ServerEvent {
    ServerEvent::Token {
        session_key: "a".into(),
        text: format!("t{n}"),
    }
}

fn done() -> ServerEvent {
    ServerEvent::Done {
        session_key: "a".into(),
        subtype: "success".into(),
        error: None,
        code: None,
    }
}

fn test_channel() -> (Channel, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(256);
    (Channel::new(tx), rx)
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn reconnect_replay_delivers_done_last_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions.json"), 32, String::new());
    store.create_if_absent("a", "a").await;

    // Client connected while the job streams its first events.
    let (channel, mut rx) = test_channel();
    store.attach_all(&channel).await;
    store.publish("a", token(0)).await;
    store.publish("a", token(1)).await;
    assert_eq!(drain(&mut rx), vec![token(0), token(1)]);

    // Disconnect, then the job finishes while nobody is attached.
    drop(rx);
    store
        .with_session("a", |session| session.relay.detach())
        .await
        .unwrap();
    store.publish("a", token(2)).await;
    store.publish_terminal("a", done()).await;

    // Reconnect: buffered events in order, terminal last, exactly once.
    let (channel, mut rx) = test_channel();
    store.attach_all(&channel).await;
    let replayed = drain(&mut rx);
    assert_eq!(replayed, vec![token(0), token(1), token(2), done()]);

    // A further reattachment must not re-deliver the completion.
    store
        .with_session("a", |session| session.relay.detach())
        .await
        .unwrap();
    let (channel, mut rx) = test_channel();
    store.attach_all(&channel).await;
    let replayed = drain(&mut rx);
    assert_eq!(replayed, vec![token(0), token(1), token(2)]);
}

#[tokio::test]
async fn sessions_replay_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions.json"), 32, String::new());
    store.create_if_absent("a", "a").await;
    store.create_if_absent("b", "b").await;

    store.publish("a", token(0)).await;
    store
        .publish(
            "b",
            ServerEvent::SysMsg {
                session_key: "b".into(),
                text: "note".into(),
            },
        )
        .await;

    let (channel, mut rx) = test_channel();
    store.attach_all(&channel).await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events.contains(&token(0)));
    assert!(events.contains(&ServerEvent::SysMsg {
        session_key: "b".into(),
        text: "note".into(),
    }));
}

#[tokio::test]
async fn publish_to_unknown_session_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions.json"), 32, String::new());
    store.publish("ghost", token(0)).await;
    store.publish_terminal("ghost", done()).await;
    assert!(store.summaries().await.is_empty());
}
