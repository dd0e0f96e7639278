//! Unit tests for the session model.

use serde_json::json;

use session_relay::models::session::{HistoryEntry, PersistedSession, Role, Session};

#[test]
fn roles_use_wire_spelling() {
    assert_eq!(serde_json::to_value(Role::User).unwrap(), json!("user"));
    assert_eq!(serde_json::to_value(Role::Claude).unwrap(), json!("claude"));
}

#[test]
fn new_sessions_start_idle_and_empty() {
    let session = Session::new("a".into(), "Alpha".into(), "sonnet".into(), 8);
    assert_eq!(session.key, "a");
    assert_eq!(session.label, "Alpha");
    assert_eq!(session.model, "sonnet");
    assert!(session.conversation_id.is_none());
    assert!(session.history.is_empty());
    assert!(session.job.is_none());
    assert!(!session.plan_mode);
    assert_eq!(session.relay.buffered_len(), 0);
}

#[test]
fn summary_reflects_current_state() {
    let mut session = Session::new("a".into(), "Alpha".into(), "sonnet".into(), 8);
    session.history.push(HistoryEntry {
        role: Role::User,
        text: "hi".into(),
    });
    session.plan_mode = true;
    session.agent = Some("reviewer".into());

    let summary = session.summary();
    assert_eq!(summary.session_key, "a");
    assert_eq!(summary.label, "Alpha");
    assert!(summary.plan_mode);
    assert_eq!(summary.agent.as_deref(), Some("reviewer"));
    assert_eq!(summary.history.len(), 1);
}

#[test]
fn persisted_round_trip_preserves_durable_fields() {
    let mut session = Session::new("a".into(), "Alpha".into(), "sonnet".into(), 8);
    session.conversation_id = Some("conv-1".into());
    session.effort = "high".into();
    session.history.push(HistoryEntry {
        role: Role::Claude,
        text: "hello".into(),
    });

    let record = session.to_persisted();
    let json = serde_json::to_string(&record).unwrap();
    let back: PersistedSession = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);

    let restored = Session::from_persisted(back, 8);
    assert_eq!(restored.key, "a");
    assert_eq!(restored.conversation_id.as_deref(), Some("conv-1"));
    assert_eq!(restored.effort, "high");
    assert_eq!(restored.history, session.history);
    assert!(restored.job.is_none());
    assert!(restored.pending_attachments.is_empty());
    assert_eq!(restored.relay.buffered_len(), 0);
}

#[test]
fn old_snapshots_without_optional_fields_still_parse() {
    let json = json!({
        "key": "a",
        "label": "Alpha",
        "effort": "medium",
        "model": "",
        "plan_mode": false,
        "created_at": "2026-01-05T10:00:00Z"
    });
    let record: PersistedSession = serde_json::from_value(json).unwrap();
    assert!(record.conversation_id.is_none());
    assert!(record.history.is_empty());
    assert!(record.agent.is_none());
}
