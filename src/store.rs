//! Process-wide session store with full-snapshot persistence.
//!
//! The store owns the session map behind a single async mutex; all
//! lookup/mutation and live-buffer append/replay go through that lock.
//! Every mutating event triggers a full-replace JSON snapshot of the
//! non-transient fields, written to a temp file and renamed over the
//! state file so a crash never leaves a truncated snapshot.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::models::session::{PersistedSession, Session};
use crate::protocol::{ServerEvent, SessionSummary};
use crate::relay::Channel;
use crate::{AppError, Result};

/// Owner of all session records.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    state_file: PathBuf,
    buffer_capacity: usize,
    default_model: String,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(state_file: PathBuf, buffer_capacity: usize, default_model: String) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            state_file,
            buffer_capacity,
            default_model,
        }
    }

    /// Restore sessions from the on-disk snapshot, if one exists.
    ///
    /// Transient state (process handle, buffers, bound channel) starts
    /// empty regardless of what was persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` when the snapshot exists but cannot
    /// be read or parsed.
    pub async fn load(&self) -> Result<usize> {
        if !self.state_file.exists() {
            info!(path = %self.state_file.display(), "no session snapshot, starting empty");
            return Ok(0);
        }
        let text = std::fs::read_to_string(&self.state_file)
            .map_err(|err| AppError::Persist(format!("cannot read snapshot: {err}")))?;
        let records: Vec<PersistedSession> = serde_json::from_str(&text)
            .map_err(|err| AppError::Persist(format!("cannot parse snapshot: {err}")))?;

        let mut sessions = self.sessions.lock().await;
        sessions.clear();
        let count = records.len();
        for record in records {
            let session = Session::from_persisted(record, self.buffer_capacity);
            sessions.insert(session.key.clone(), session);
        }
        info!(count, "restored sessions from snapshot");
        Ok(count)
    }

    /// Write a full-replace snapshot of all sessions.
    ///
    /// Failures are logged and swallowed: the in-memory store keeps
    /// operating and the on-disk state simply lags until the next
    /// mutating event.
    pub async fn save(&self) {
        let records: Vec<PersistedSession> = {
            let sessions = self.sessions.lock().await;
            sessions.values().map(Session::to_persisted).collect()
        };
        if let Err(err) = write_snapshot(&self.state_file, &records) {
            warn!(%err, path = %self.state_file.display(), "session snapshot write failed");
        }
    }

    /// Find-or-create a session. Returns `true` when a new record was
    /// created; an existing key is a no-op lookup, never a duplicate.
    pub async fn create_if_absent(&self, key: &str, label: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(key) {
            return false;
        }
        let session = Session::new(
            key.to_owned(),
            label.to_owned(),
            self.default_model.clone(),
            self.buffer_capacity,
        );
        sessions.insert(key.to_owned(), session);
        true
    }

    /// Run `f` against the named session under the store lock.
    ///
    /// Returns `None` when the session does not exist.
    pub async fn with_session<T>(&self, key: &str, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(key).map(f)
    }

    /// Remove a session entirely. Returns the removed record so the
    /// caller can tear down its job.
    pub async fn remove(&self, key: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(key)
    }

    /// Whether a session exists.
    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    /// Client-facing summaries of all sessions.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let mut all: Vec<SessionSummary> = sessions.values().map(Session::summary).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Bind `channel` to every session: replay each live buffer in
    /// order, then deliver any deferred terminal events.
    pub async fn attach_all(&self, channel: &Channel) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values_mut() {
            session.relay.attach(channel.clone());
        }
    }

    /// Publish an event to one session's relay.
    pub async fn publish(&self, key: &str, event: ServerEvent) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            session.relay.publish(event);
        }
    }

    /// Publish a terminal event to one session's relay, deferring it
    /// when no channel is attached.
    pub async fn publish_terminal(&self, key: &str, event: ServerEvent) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            session.relay.publish_terminal(event);
        }
    }
}

/// Serialize `records` and atomically replace the snapshot file.
fn write_snapshot(path: &Path, records: &[PersistedSession]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .map_err(|err| AppError::Persist(format!("serialize snapshot: {err}")))?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new_in("."),
    }
    .map_err(|err| AppError::Persist(format!("create temp snapshot: {err}")))?;

    tmp.write_all(&json)
        .map_err(|err| AppError::Persist(format!("write temp snapshot: {err}")))?;
    tmp.persist(path)
        .map_err(|err| AppError::Persist(format!("replace snapshot: {err}")))?;
    Ok(())
}
