//! Fetch and embed progress reporting.
//!
//! Reports observable progress during `starpilot read` so users see pages
//! being fetched and documents being embedded. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A page of starred repositories has been fetched.
    Fetching { user: String, page: u64, repos: u64 },
    /// n documents embedded out of total.
    Embedding { n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "embedding  1,234 / 5,000 documents".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Fetching { user, page, repos } => format!(
                "fetch {}  page {}  {} stars so far\n",
                user,
                page,
                format_number(*repos)
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "embedding  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Fetching { user, page, repos } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "user": user,
                "page": page,
                "repos": repos
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Auto => {
                if atty::is(atty::Stream::Stderr) {
                    Box::new(StderrProgress)
                } else {
                    Box::new(NoProgress)
                }
            }
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
