//! Upstream event schema and line classification.
//!
//! The child emits one JSON event per stdout line. Lines that do not
//! start with `{` are diagnostic text: in plan mode they are checked
//! against the approval-prompt patterns, otherwise forwarded verbatim
//! as informational events.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol::ServerEvent;

/// Structured event decoded from the child's stdout stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Lifecycle events; `init` carries the conversation identifier.
    System(SystemEvent),
    /// Assistant output: text deltas and tool invocations.
    Assistant(MessageEvent),
    /// Tool results echoed back through the user turn.
    User(MessageEvent),
    /// Terminal result with usage counters and a completion subtype.
    Result(ResultEvent),
    /// Recognized-but-unhandled event types are ignored.
    #[serde(other)]
    Other,
}

/// `system`-typed event payload.
#[derive(Debug, Deserialize)]
pub struct SystemEvent {
    /// Event subtype (`init` is the one the relay reacts to).
    #[serde(default)]
    pub subtype: Option<String>,
    /// Conversation identifier for later resumption.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `assistant`/`user`-typed event payload.
#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    /// Raw message body; `content` is either a string or a block array.
    #[serde(default)]
    pub message: Value,
}

/// `result`-typed event payload.
#[derive(Debug, Deserialize)]
pub struct ResultEvent {
    /// Completion subtype (e.g. `success`, `error_max_turns`).
    #[serde(default)]
    pub subtype: Option<String>,
    /// Whether the run ended in error.
    #[serde(default)]
    pub is_error: Option<bool>,
    /// Final response text.
    #[serde(default)]
    pub result: Option<String>,
    /// Token usage counters.
    #[serde(default)]
    pub usage: Option<UsageCounters>,
}

/// Usage counters carried by the result event.
#[derive(Debug, Default, Deserialize)]
pub struct UsageCounters {
    /// Input token count.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output token count.
    #[serde(default)]
    pub output_tokens: u64,
}

/// Classification of one normalized stdout line.
#[derive(Debug)]
pub enum LineClass {
    /// Blank after normalization; skipped.
    Empty,
    /// A structured event.
    Event(StreamEvent),
    /// Claimed to be JSON but failed to parse; logged and dropped.
    Malformed(String),
    /// Non-JSON diagnostic text.
    Text(String),
}

/// Classify a normalized line from the child's stdout.
#[must_use]
pub fn classify_line(line: &str) -> LineClass {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineClass::Empty;
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<StreamEvent>(trimmed) {
            Ok(event) => LineClass::Event(event),
            Err(err) => LineClass::Malformed(err.to_string()),
        };
    }
    LineClass::Text(trimmed.to_owned())
}

/// Translate an assistant/user message body into outbound events.
///
/// Assistant text blocks become `token` events (and are returned for
/// response accumulation); tool invocations become `tool_use`; tool
/// results become `tool_result` with content truncated to
/// `tool_result_limit` bytes.
#[must_use]
pub fn message_events(
    session_key: &str,
    event: &StreamEvent,
    tool_result_limit: usize,
) -> Vec<ServerEvent> {
    match event {
        StreamEvent::Assistant(msg) => assistant_events(session_key, &msg.message),
        StreamEvent::User(msg) => user_events(session_key, &msg.message, tool_result_limit),
        _ => Vec::new(),
    }
}

fn assistant_events(session_key: &str, message: &Value) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    match message.get("content") {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                events.push(ServerEvent::Token {
                    session_key: session_key.to_owned(),
                    text: text.clone(),
                });
            }
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            events.push(ServerEvent::Token {
                                session_key: session_key.to_owned(),
                                text: text.to_owned(),
                            });
                        }
                    }
                    Some("tool_use") => {
                        events.push(ServerEvent::ToolUse {
                            session_key: session_key.to_owned(),
                            name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                            input: block.get("input").cloned().unwrap_or(Value::Null),
                            id: block
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                        });
                    }
                    other => debug!(?other, "skipping unknown assistant content block"),
                }
            }
        }
        _ => {}
    }
    events
}

fn user_events(session_key: &str, message: &Value, tool_result_limit: usize) -> Vec<ServerEvent> {
    let Some(Value::Array(blocks)) = message.get("content") else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
        .map(|block| ServerEvent::ToolResult {
            session_key: session_key.to_owned(),
            tool_use_id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            content: truncate_bytes(&flatten_content(block.get("content")), tool_result_limit),
        })
        .collect()
}

/// Flatten a tool-result `content` field (string, or array of text
/// blocks) into plain text.
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Truncate to at most `limit` bytes on a character boundary, appending
/// an ellipsis marker when anything was cut.
#[must_use]
pub fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Whether a stderr line is a known benign wrapper-tool banner that
/// should not be surfaced to the client.
#[must_use]
pub fn is_benign_stderr(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.starts_with("npm warn")
        || trimmed.starts_with("npm WARN")
        || trimmed.contains("ExperimentalWarning")
        || trimmed.contains("punycode")
        || trimmed.starts_with("(Use `node")
        || trimmed.starts_with("Debugger attached")
}
