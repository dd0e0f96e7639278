//! Duplex-channel wire protocol.
//!
//! Inbound commands and outbound events are `type`-discriminated JSON
//! messages. Field names are camelCase on the wire except `tool_use_id`,
//! which keeps the upstream event schema's spelling.

use serde::{Deserialize, Serialize};

use crate::models::session::HistoryEntry;

/// Inbound command sent by the remote client over the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Shared-secret authentication; must be the first message.
    Auth {
        /// The shared channel secret.
        password: String,
    },
    /// Liveness probe; answered with `pong`.
    Ping,
    /// Submit a job for a session, creating the session if absent.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Target session key.
        session_key: String,
        /// Free-text prompt.
        text: String,
        /// Additional upload-directory file names to merge into the job.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<String>>,
    },
    /// Create a session without submitting a job.
    #[serde(rename_all = "camelCase")]
    NewSession {
        /// Client-chosen session key.
        session_key: String,
        /// Human label.
        label: String,
        /// Whether the session starts in plan mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_mode: Option<bool>,
        /// Named agent persona applied to the session's jobs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
        /// Upstream conversation identifier to resume from.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_session_id: Option<String>,
    },
    /// Cancel the session's running job, if any.
    #[serde(rename_all = "camelCase")]
    Cancel {
        /// Target session key.
        session_key: String,
    },
    /// Remove the session from the store entirely.
    #[serde(rename_all = "camelCase")]
    KillSession {
        /// Target session key.
        session_key: String,
    },
    /// Change the session's effort level.
    #[serde(rename_all = "camelCase")]
    SetEffort {
        /// Target session key.
        session_key: String,
        /// New effort level.
        effort: String,
    },
    /// Change the session's model identifier.
    #[serde(rename_all = "camelCase")]
    SetModel {
        /// Target session key.
        session_key: String,
        /// New model identifier.
        model: String,
    },
    /// Toggle the session's plan mode.
    #[serde(rename_all = "camelCase")]
    SetPlanMode {
        /// Target session key.
        session_key: String,
        /// New plan-mode flag.
        plan_mode: bool,
    },
    /// Approve a plan the session is waiting on.
    #[serde(rename_all = "camelCase")]
    PlanApprove {
        /// Target session key.
        session_key: String,
    },
    /// Reject a plan the session is waiting on.
    #[serde(rename_all = "camelCase")]
    PlanReject {
        /// Target session key.
        session_key: String,
    },
    /// Upload a file into the session's pending-attachment queue.
    #[serde(rename_all = "camelCase")]
    Attachment {
        /// Target session key.
        session_key: String,
        /// Client-side file name.
        name: String,
        /// Base64-encoded file contents.
        data: String,
    },
}

/// Summary of a stored session, sent inside `auth_ok`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session key.
    pub session_key: String,
    /// Human label.
    pub label: String,
    /// Effort level.
    pub effort: String,
    /// Model identifier.
    pub model: String,
    /// Plan-mode flag.
    pub plan_mode: bool,
    /// Named agent persona, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Exchanged messages.
    pub history: Vec<HistoryEntry>,
}

/// Outbound event delivered to the attached channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authentication accepted; carries the full session list.
    AuthOk {
        /// Stored sessions at attachment time.
        sessions: Vec<SessionSummary>,
    },
    /// Authentication rejected.
    AuthFail,
    /// The child reported its conversation identifier.
    #[serde(rename_all = "camelCase")]
    SessionInit {
        /// Owning session key.
        session_key: String,
        /// Opaque upstream conversation identifier.
        session_id: String,
    },
    /// Assistant text delta.
    #[serde(rename_all = "camelCase")]
    Token {
        /// Owning session key.
        session_key: String,
        /// Text fragment.
        text: String,
    },
    /// Assistant tool invocation request.
    #[serde(rename_all = "camelCase")]
    ToolUse {
        /// Owning session key.
        session_key: String,
        /// Tool name.
        name: String,
        /// Tool input payload.
        input: serde_json::Value,
        /// Upstream tool-use identifier.
        id: String,
    },
    /// Tool result payload, truncated to the configured byte ceiling.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        /// Owning session key.
        session_key: String,
        /// Upstream tool-use identifier this result answers.
        #[serde(rename = "tool_use_id")]
        tool_use_id: String,
        /// Truncated result content.
        content: String,
    },
    /// Usage counters from the terminal result event.
    #[serde(rename_all = "camelCase")]
    Usage {
        /// Owning session key.
        session_key: String,
        /// Input token count.
        input_tokens: u64,
        /// Output token count.
        output_tokens: u64,
        /// Context window size for the session's model.
        context_limit: u64,
    },
    /// Terminal event: the job finished, was cancelled, or was killed.
    #[serde(rename_all = "camelCase")]
    Done {
        /// Owning session key.
        session_key: String,
        /// Completion subtype (e.g. `success`, `cancelled`).
        subtype: String,
        /// Error text for abnormal completions.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Process exit code when available.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
    /// The plan-approval gate fired; the job awaits a decision.
    #[serde(rename_all = "camelCase")]
    PlanWaiting {
        /// Owning session key.
        session_key: String,
    },
    /// Informational text from the child or the server.
    #[serde(rename_all = "camelCase")]
    SysMsg {
        /// Owning session key.
        session_key: String,
        /// Message text.
        text: String,
    },
    /// Warning/error text scoped to one session.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Owning session key.
        session_key: String,
        /// Error text.
        text: String,
    },
    /// The session was removed from the store.
    #[serde(rename_all = "camelCase")]
    SessionKilled {
        /// Removed session key.
        session_key: String,
    },
    /// Liveness probe response.
    Pong,
}

impl ServerEvent {
    /// Whether this event is a terminal completion event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
