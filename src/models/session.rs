//! Session record: the durable state of one logical conversation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::JobHandle;
use crate::protocol::SessionSummary;
use crate::relay::RelayState;

/// Author of a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The remote operator.
    User,
    /// The agent CLI.
    Claude,
}

/// One exchanged message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub text: String,
}

/// In-memory session record.
///
/// Persistent fields round-trip through [`PersistedSession`]; everything
/// else is transient and reset to empty on restore.
#[derive(Debug)]
pub struct Session {
    /// Unique client-chosen session key.
    pub key: String,
    /// Human label.
    pub label: String,
    /// Opaque upstream conversation identifier, set once the child
    /// reports it; used to resume.
    pub conversation_id: Option<String>,
    /// Append-only history of exchanged messages.
    pub history: Vec<HistoryEntry>,
    /// Effort level passed to higher-tier models.
    pub effort: String,
    /// Model identifier; empty means the CLI default.
    pub model: String,
    /// Whether jobs run in plan mode.
    pub plan_mode: bool,
    /// Named agent persona applied to jobs.
    pub agent: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Running job handle; `None` when idle.
    pub job: Option<JobHandle>,
    /// Upload paths to merge into the next job's prompt.
    pub pending_attachments: Vec<PathBuf>,
    /// Replay buffer, deferred terminal event, and bound channel.
    pub relay: RelayState,
}

impl Session {
    /// Construct a fresh idle session.
    #[must_use]
    pub fn new(key: String, label: String, model: String, buffer_capacity: usize) -> Self {
        Self {
            key,
            label,
            conversation_id: None,
            history: Vec::new(),
            effort: "medium".into(),
            model,
            plan_mode: false,
            agent: None,
            created_at: Utc::now(),
            job: None,
            pending_attachments: Vec::new(),
            relay: RelayState::new(buffer_capacity),
        }
    }

    /// Client-facing summary of this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_key: self.key.clone(),
            label: self.label.clone(),
            effort: self.effort.clone(),
            model: self.model.clone(),
            plan_mode: self.plan_mode,
            agent: self.agent.clone(),
            created_at: self.created_at,
            history: self.history.clone(),
        }
    }

    /// Snapshot of the non-transient fields.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            key: self.key.clone(),
            label: self.label.clone(),
            conversation_id: self.conversation_id.clone(),
            history: self.history.clone(),
            effort: self.effort.clone(),
            model: self.model.clone(),
            plan_mode: self.plan_mode,
            agent: self.agent.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuild a session from a snapshot; transient state starts empty.
    #[must_use]
    pub fn from_persisted(record: PersistedSession, buffer_capacity: usize) -> Self {
        Self {
            key: record.key,
            label: record.label,
            conversation_id: record.conversation_id,
            history: record.history,
            effort: record.effort,
            model: record.model,
            plan_mode: record.plan_mode,
            agent: record.agent,
            created_at: record.created_at,
            job: None,
            pending_attachments: Vec::new(),
            relay: RelayState::new(buffer_capacity),
        }
    }
}

/// On-disk form of a session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PersistedSession {
    /// Session key.
    pub key: String,
    /// Human label.
    pub label: String,
    /// Upstream conversation identifier.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Exchanged messages.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Effort level.
    pub effort: String,
    /// Model identifier.
    pub model: String,
    /// Plan-mode flag.
    pub plan_mode: bool,
    /// Named agent persona.
    #[serde(default)]
    pub agent: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
