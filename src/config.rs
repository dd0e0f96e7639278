//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable holding the shared channel secret.
///
/// The secret gates WebSocket attachment and is never read from the TOML
/// config file.
pub const PASSWORD_ENV_VAR: &str = "SESSION_RELAY_PASSWORD";

/// Child process job configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// Agent CLI binary (e.g., `claude`).
    #[serde(default = "default_cli")]
    pub cli: String,
    /// Extra arguments passed to the CLI before per-job flags.
    #[serde(default)]
    pub base_args: Vec<String>,
    /// Default model identifier for new sessions; empty means CLI default.
    #[serde(default)]
    pub default_model: String,
    /// Byte ceiling applied to relayed tool-result payloads.
    #[serde(default = "default_tool_result_limit")]
    pub tool_result_limit: usize,
    /// Context window size reported alongside usage counters.
    #[serde(default = "default_context_limit")]
    pub context_limit: u64,
}

fn default_cli() -> String {
    "claude".into()
}

fn default_tool_result_limit() -> usize {
    800
}

fn default_context_limit() -> u64 {
    200_000
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            base_args: Vec::new(),
            default_model: String::new(),
            tool_result_limit: default_tool_result_limit(),
            context_limit: default_context_limit(),
        }
    }
}

/// Plan-approval gate configuration.
///
/// The approval-prompt patterns are configuration rather than hard logic:
/// the pattern set is a heuristic fallback for agent CLIs that print a
/// free-text question instead of emitting a structured awaiting-input
/// signal.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PlanConfig {
    /// Seconds of stdout silence (after some response text) before the
    /// gate fires.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Grace period in milliseconds between writing the reject token and
    /// force-terminating the process group.
    #[serde(default = "default_reject_grace_ms")]
    pub reject_grace_ms: u64,
    /// Case-insensitive regexes matched against non-JSON stdout lines.
    #[serde(default = "default_approval_patterns")]
    pub approval_patterns: Vec<String>,
    /// Token written to child stdin on approval.
    #[serde(default = "default_approve_token")]
    pub approve_token: String,
    /// Token written to child stdin on rejection.
    #[serde(default = "default_reject_token")]
    pub reject_token: String,
}

fn default_idle_seconds() -> u64 {
    2
}

fn default_reject_grace_ms() -> u64 {
    200
}

fn default_approval_patterns() -> Vec<String> {
    vec![
        r"(?i)\bproceed\b.*\?".into(),
        r"(?i)do you want to\b".into(),
        r"(?i)\bapprove this plan\b".into(),
    ]
}

fn default_approve_token() -> String {
    "y".into()
}

fn default_reject_token() -> String {
    "n".into()
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            idle_seconds: default_idle_seconds(),
            reject_grace_ms: default_reject_grace_ms(),
            approval_patterns: default_approval_patterns(),
            approve_token: default_approve_token(),
            reject_token: default_reject_token(),
        }
    }
}

/// External speech-to-text endpoint configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TranscribeConfig {
    /// HTTP endpoint accepting multipart audio uploads; empty disables
    /// the route.
    #[serde(default)]
    pub endpoint: String,
    /// Environment variable holding the endpoint API key.
    #[serde(default = "default_transcribe_key_var")]
    pub api_key_var: String,
    /// Transcription model identifier sent with the upload.
    #[serde(default = "default_transcribe_model")]
    pub model: String,
}

fn default_transcribe_key_var() -> String {
    "SESSION_RELAY_TRANSCRIBE_KEY".into()
}

fn default_transcribe_model() -> String {
    "whisper-1".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Socket address the HTTP/WebSocket server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path of the JSON session snapshot file.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Directory receiving client uploads and served by the file browser.
    pub upload_dir: PathBuf,
    /// Directory holding agent-persona definition files.
    #[serde(default)]
    pub agents_dir: Option<PathBuf>,
    /// Capacity of the per-session replay buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Child process job settings.
    #[serde(default)]
    pub job: JobConfig,
    /// Plan-approval gate settings.
    #[serde(default)]
    pub plan: PlanConfig,
    /// Speech-to-text settings.
    #[serde(default)]
    pub transcribe: TranscribeConfig,
    /// Shared channel secret (populated at runtime from the environment).
    #[serde(skip)]
    pub password: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".into()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("sessions.json")
}

fn default_buffer_capacity() -> usize {
    400
}

impl GlobalConfig {
    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the TOML is malformed or a value
    /// fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the shared channel secret from the environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the variable is unset or empty —
    /// the server refuses to run without a secret gating the channel.
    pub fn load_credentials(&mut self) -> Result<()> {
        let secret = env::var(PASSWORD_ENV_VAR)
            .map_err(|_| AppError::Config(format!("{PASSWORD_ENV_VAR} is not set")))?;
        if secret.trim().is_empty() {
            return Err(AppError::Config(format!("{PASSWORD_ENV_VAR} is empty")));
        }
        self.password = secret;
        Ok(())
    }

    /// Compile the configured approval-prompt patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid pattern.
    pub fn approval_regexes(&self) -> Result<Vec<regex::Regex>> {
        self.plan
            .approval_patterns
            .iter()
            .map(|p| {
                regex::Regex::new(p)
                    .map_err(|err| AppError::Config(format!("bad approval pattern {p:?}: {err}")))
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(AppError::Config("buffer_capacity must be non-zero".into()));
        }
        if self.job.cli.trim().is_empty() {
            return Err(AppError::Config("job.cli must be non-empty".into()));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(AppError::Config("upload_dir must be set".into()));
        }
        // Fail fast on unparsable patterns rather than at first plan-mode job.
        self.approval_regexes()?;
        Ok(())
    }
}
