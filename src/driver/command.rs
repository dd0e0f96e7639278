//! Child process command construction and spawning.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::{AppError, Result};

/// Everything needed to launch one job's child process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Agent CLI binary.
    pub cli: String,
    /// Arguments placed before the per-job flags.
    pub base_args: Vec<String>,
    /// Model identifier; empty means the CLI default.
    pub model: String,
    /// Effort level; only passed for higher-tier models.
    pub effort: String,
    /// Whether to run in plan mode.
    pub plan_mode: bool,
    /// Conversation identifier to resume, if any.
    pub resume: Option<String>,
    /// Upload directory named in the injected system directive; also the
    /// child's working directory so generated files land there.
    pub upload_dir: PathBuf,
    /// Agent-persona directive body, if a named agent was resolved.
    pub agent_directive: Option<String>,
    /// Free-text prompt.
    pub prompt: String,
    /// Uploaded files merged into the prompt as a path manifest.
    pub attachments: Vec<PathBuf>,
}

impl SpawnSpec {
    /// Prompt text with the attachment manifest appended.
    #[must_use]
    pub fn full_prompt(&self) -> String {
        if self.attachments.is_empty() {
            return self.prompt.clone();
        }
        let mut prompt = self.prompt.clone();
        prompt.push_str("\n\nAttached files:");
        for path in &self.attachments {
            prompt.push_str("\n- ");
            prompt.push_str(&path.display().to_string());
        }
        prompt
    }

    /// Injected system directive: upload-directory notice plus the
    /// optional agent persona.
    #[must_use]
    pub fn system_directive(&self) -> String {
        let mut directive = format!(
            "Files uploaded by the operator are stored in {}. \
             Read attachments from there and write generated files into the same directory.",
            self.upload_dir.display()
        );
        if let Some(agent) = &self.agent_directive {
            directive.push_str("\n\n");
            directive.push_str(agent);
        }
        directive
    }

    /// Build the full argument list for the CLI invocation.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.base_args.clone();
        args.push("-p".into());
        args.push(self.full_prompt());
        args.push("--output-format".into());
        args.push("stream-json".into());
        args.push("--verbose".into());

        if !self.model.is_empty() {
            args.push("--model".into());
            args.push(self.model.clone());
            // Effort is only understood by the higher-tier variants.
            if self.model.starts_with("opus") && !self.effort.is_empty() {
                args.push("--effort".into());
                args.push(self.effort.clone());
            }
        }
        if self.plan_mode {
            args.push("--permission-mode".into());
            args.push("plan".into());
        }
        if let Some(resume) = &self.resume {
            args.push("--resume".into());
            args.push(resume.clone());
        }
        args.push("--append-system-prompt".into());
        args.push(self.system_directive());
        args
    }
}

/// Spawn the child in its own process group with piped stdio.
///
/// Returns the child and its process-group id (the child's own pid on
/// unix, where it is made group leader so termination can sweep any
/// grandchildren).
///
/// # Errors
///
/// Returns `AppError::Spawn` when the OS refuses the spawn.
pub fn spawn(spec: &SpawnSpec) -> Result<(Child, Option<i32>)> {
    let args = spec.build_args();
    let mut cmd = Command::new(&spec.cli);
    cmd.args(&args)
        .current_dir(&spec.upload_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", spec.cli)))?;

    #[allow(clippy::cast_possible_wrap)]
    let pgid = child.id().map(|pid| pid as i32);
    info!(cli = %spec.cli, ?pgid, "spawned agent process");
    Ok((child, pgid))
}
