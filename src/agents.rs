//! Agent-persona definition files.
//!
//! An agent definition is a Markdown file with optional `---`-delimited
//! front matter followed by the persona body. The body is injected into
//! the child's system directive when a session names the agent.

use std::collections::HashMap;
use std::path::Path;

use crate::{AppError, Result};

/// Parsed agent definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    /// Agent name (file stem).
    pub name: String,
    /// Front-matter key/value pairs, if any.
    pub front_matter: HashMap<String, String>,
    /// Persona directive body.
    pub body: String,
}

/// Load and parse one agent definition by name.
///
/// # Errors
///
/// Returns `AppError::NotFound` for a missing file and `AppError::Io`
/// for unreadable ones. Callers treat both as non-fatal.
pub fn load_agent(dir: &Path, name: &str) -> Result<AgentDefinition> {
    // Names come over the wire; keep lookups inside the agents dir.
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(AppError::NotFound(format!("invalid agent name {name:?}")));
    }
    let path = dir.join(format!("{name}.md"));
    if !path.is_file() {
        return Err(AppError::NotFound(format!("agent {name:?} not found")));
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
    Ok(parse_definition(name, &text))
}

/// Names of all agent definitions in `dir`, sorted.
#[must_use]
pub fn list_agents(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

/// Split optional front matter from the body.
fn parse_definition(name: &str, text: &str) -> AgentDefinition {
    let mut front_matter = HashMap::new();
    let body;

    let trimmed = text.trim_start_matches('\u{feff}');
    if let Some(rest) = trimmed.strip_prefix("---\n").or_else(|| trimmed.strip_prefix("---\r\n")) {
        if let Some(end) = rest.find("\n---") {
            let header = &rest[..end];
            for line in header.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    front_matter.insert(key.trim().to_owned(), value.trim().to_owned());
                }
            }
            let after = &rest[end + 4..];
            body = after.trim_start_matches(['\r', '\n']).trim_end().to_owned();
        } else {
            body = trimmed.trim_end().to_owned();
        }
    } else {
        body = trimmed.trim_end().to_owned();
    }

    AgentDefinition {
        name: name.to_owned(),
        front_matter,
        body,
    }
}
