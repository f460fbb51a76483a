//! `starpilot setup`: store API credentials in the env file.
//!
//! Existing lines are preserved; only the keys being set are replaced or
//! appended.

use anyhow::{bail, Context, Result};
use std::io::{BufRead, Write};
use std::path::Path;

use crate::config::{GITHUB_TOKEN_VARS, OPENAI_KEY_VAR, OPENAI_ORG_VAR};
use crate::error::StarpilotError;

/// Prompt on `output`, read answers from `input`, and write them to
/// `env_file`. Returns the keys that were written.
pub fn run_setup(
    env_file: &Path,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Vec<String>> {
    let github_var = GITHUB_TOKEN_VARS[0];

    let token = prompt(input, output, "GitHub personal access token (required): ")?;
    if token.is_empty() {
        bail!(StarpilotError::Authentication(format!(
            "{} is required to read starred repositories",
            github_var
        )));
    }

    let mut entries = vec![(github_var.to_string(), token)];

    let openai_key = prompt(input, output, "OpenAI API key (optional, Enter to skip): ")?;
    if !openai_key.is_empty() {
        entries.push((OPENAI_KEY_VAR.to_string(), openai_key));
    }
    let openai_org = prompt(input, output, "OpenAI organization ID (optional, Enter to skip): ")?;
    if !openai_org.is_empty() {
        entries.push((OPENAI_ORG_VAR.to_string(), openai_org));
    }

    upsert_env_vars(env_file, &entries)?;
    Ok(entries.into_iter().map(|(k, _)| k).collect())
}

fn prompt(input: &mut impl BufRead, output: &mut impl Write, label: &str) -> Result<String> {
    output.write_all(label.as_bytes())?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Set `KEY=value` lines in the env file, creating it if needed.
pub fn upsert_env_vars(path: &Path, entries: &[(String, String)]) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut pending: Vec<&(String, String)> = entries.iter().collect();
    let mut lines: Vec<String> = Vec::new();

    for line in existing.lines() {
        let key = line
            .trim_start()
            .trim_start_matches("export ")
            .split('=')
            .next()
            .unwrap_or("")
            .trim();
        match pending.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                let (k, v) = pending.remove(pos);
                lines.push(format_entry(k, v));
            }
            None => lines.push(line.to_string()),
        }
    }
    for (k, v) in pending {
        lines.push(format_entry(k, v));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content).map_err(|source| StarpilotError::Write {
        record: path.display().to_string(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn format_entry(key: &str, value: &str) -> String {
    if value.contains(|c: char| c.is_whitespace() || c == '#' || c == '"') {
        format!("{}=\"{}\"", key, value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        format!("{}={}", key, value)
    }
}
