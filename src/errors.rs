//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Child process spawn or control failure.
    Spawn(String),
    /// Event-stream framing or JSON decode failure.
    Decode(String),
    /// State snapshot read or write failure.
    Persist(String),
    /// Duplex channel send or protocol failure.
    Channel(String),
    /// Speech-to-text endpoint failure.
    Transcribe(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller failed the shared-secret check.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Persist(msg) => write!(f, "persist: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Transcribe(msg) => write!(f, "transcribe: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
