//! Error taxonomy for the fetch → prepare → query pipeline.
//!
//! Command functions return [`anyhow::Result`]; when a failure belongs to one
//! of the categories below it is raised as a [`StarpilotError`] so callers
//! (and tests) can recover the kind with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarpilotError {
    /// Missing or rejected credentials for the GitHub API.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// GitHub rate limit hit. Never retried automatically.
    #[error("GitHub rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimit { reset_at: Option<String> },

    /// Transient network/API failure that survived the retry budget,
    /// or a non-retryable API error.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A fetched record lacks a required field.
    #[error("repository '{repo}' is missing required field '{field}'")]
    Schema { repo: String, field: &'static str },

    /// Query attempted before `read` has built the index.
    #[error("no vector store at {}; run `starpilot read <user>` first", .path.display())]
    StoreNotFound { path: PathBuf },

    /// Disk cache or index write failure.
    #[error("failed to write '{record}': {source}")]
    Write {
        record: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

fn reset_suffix(reset_at: &Option<String>) -> String {
    match reset_at {
        Some(at) => format!(" (resets at {})", at),
        None => String::new(),
    }
}
