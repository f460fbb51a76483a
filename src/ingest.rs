//! `starpilot read`: the fetch → normalize → cache → prepare → index flow.
//!
//! Each run replaces both the content cache and the index. Per-record
//! problems (schema errors, empty documents) are skipped with a warning;
//! fetch, credential and write failures abort the run.

use anyhow::Result;

use crate::cache;
use crate::config::{self, Config, DocumentText};
use crate::embedding::{self, EmbeddingProvider};
use crate::github::GitHubClient;
use crate::index;
use crate::normalize;
use crate::prepare;
use crate::progress::ProgressReporter;

/// Counts from one `read` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSummary {
    pub fetched: usize,
    pub normalized: usize,
    pub without_content: usize,
    pub documents: usize,
    pub indexed: usize,
    pub model: String,
}

/// Run the whole pipeline for `user` with an already-built client and
/// embedding provider.
pub async fn ingest_stars(
    config: &Config,
    client: &GitHubClient,
    provider: &dyn EmbeddingProvider,
    user: &str,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<ReadSummary> {
    let raw = client.fetch_starred_repos(user, limit, progress).await?;
    tracing::info!("fetched {} starred repositories for {}", raw.len(), user);

    let records = normalize::normalize_all(&raw);
    let without_content = records.iter().filter(|r| !r.has_usable_content()).count();

    cache::write_records(&config.paths.content_dir, &records)?;

    let documents = prepare::prepare_documents(&config.paths.content_dir, config.documents.text)?;
    if documents.is_empty() {
        tracing::warn!("no repositories with usable text; the index will be empty");
    }

    let info = index::build_index(
        &config.paths.vectorstore_dir,
        &documents,
        provider,
        config.embedding.batch_size,
        progress,
    )
    .await?;

    Ok(ReadSummary {
        fetched: raw.len(),
        normalized: records.len(),
        without_content,
        documents: documents.len(),
        indexed: info.document_count,
        model: info.model,
    })
}

pub async fn run_read(
    config: &Config,
    user: &str,
    limit: Option<usize>,
    skip_readmes: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let token = config::github_token()?;
    let provider = embedding::create_provider(&config.embedding)?;
    if skip_readmes && config.documents.text == DocumentText::Readme {
        tracing::warn!(
            "--skip-readmes with documents.text = \"readme\": embedding content instead"
        );
    }
    let client = GitHubClient::from_config(&config.github, &token)?
        .with_readmes(config.github.include_readmes && !skip_readmes);

    let summary = ingest_stars(config, &client, provider.as_ref(), user, limit, progress).await?;

    println!("read {}", user);
    println!("  fetched: {} repos", summary.fetched);
    println!(
        "  cached: {} records in {}",
        summary.normalized,
        config.paths.content_dir.display()
    );
    if summary.fetched > summary.normalized {
        println!("  skipped: {} (missing required fields)", summary.fetched - summary.normalized);
    }
    if summary.without_content > 0 {
        println!("  without content: {}", summary.without_content);
    }
    println!(
        "  indexed: {} documents in {} (model {})",
        summary.indexed,
        config.paths.vectorstore_dir.display(),
        summary.model
    );
    println!("ok");
    Ok(())
}
