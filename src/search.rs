//! `starpilot shoot`: similarity search over the index, printed as a table.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::StarpilotError;
use crate::models::{MetadataValue, ScoredDocument};
use crate::retriever::{Retriever, RetrieverConfig, SearchStrategy};

/// Command-line overrides for the `[retrieval]` config section.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOverrides {
    pub method: Option<SearchStrategy>,
    pub k: Option<usize>,
    pub threshold: Option<f64>,
    pub fetch_k: Option<usize>,
}

impl RetrievalOverrides {
    /// Merge onto the configured defaults.
    pub fn apply(&self, config: &Config) -> RetrieverConfig {
        let mut rc = RetrieverConfig::from(&config.retrieval);
        if let Some(method) = self.method {
            rc.strategy = method;
        }
        if let Some(k) = self.k {
            rc.k = k;
        }
        if let Some(threshold) = self.threshold {
            rc.score_threshold = threshold;
        }
        if let Some(fetch_k) = self.fetch_k {
            rc.fetch_k = fetch_k;
        }
        // A larger --k than the configured pool should widen the pool.
        if self.fetch_k.is_none() && rc.fetch_k < rc.k {
            rc.fetch_k = rc.k;
        }
        rc
    }
}

/// Open the configured index, failing before any provider setup when it
/// has not been built.
pub async fn open_retriever(config: &Config, rc: RetrieverConfig) -> Result<Retriever> {
    let dir = &config.paths.vectorstore_dir;
    ensure_index_exists(dir)?;

    let provider = embedding::create_provider(&config.embedding)?;
    Retriever::open(dir, rc, provider).await
}

pub(crate) fn ensure_index_exists(dir: &Path) -> Result<()> {
    if !dir.join(db::INDEX_DB_FILE).is_file() {
        bail!(StarpilotError::StoreNotFound {
            path: dir.to_path_buf()
        });
    }
    Ok(())
}

pub async fn run_shoot(config: &Config, query: &str, overrides: &RetrievalOverrides) -> Result<()> {
    let rc = overrides.apply(config);
    rc.validate()?;

    let retriever = open_retriever(config, rc).await?;

    if query.trim().is_empty() || retriever.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let results = retriever.retrieve(query).await?;
    print_results(&results);
    Ok(())
}

pub fn print_results(results: &[ScoredDocument]) {
    print!("{}", format_results_table(results));
}

const DESCRIPTION_WIDTH: usize = 48;
const TOPICS_WIDTH: usize = 32;

/// Render rank, score, repo, description, URL, topics, language(s) and stars.
pub fn format_results_table(results: &[ScoredDocument]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }

    let rows: Vec<[String; 8]> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let repo = r
                .meta_str("full_name")
                .or_else(|| r.meta_str("name"))
                .unwrap_or(&r.document.id)
                .to_string();
            let languages = r
                .meta_str("languages")
                .or_else(|| r.meta_str("primary_language"))
                .unwrap_or("")
                .to_string();
            let stars = match r.document.metadata.get("star_count") {
                Some(MetadataValue::Integer(n)) => n.to_string(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            [
                (i + 1).to_string(),
                format!("{:.3}", r.score),
                repo,
                truncate(r.meta_str("description").unwrap_or(""), DESCRIPTION_WIDTH),
                r.meta_str("url").unwrap_or("").to_string(),
                truncate(r.meta_str("topics").unwrap_or(""), TOPICS_WIDTH),
                languages,
                stars,
            ]
        })
        .collect();

    let headers = [
        "#", "SCORE", "REPO", "DESCRIPTION", "URL", "TOPICS", "LANGUAGES", "STARS",
    ];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers.iter().map(|h| h.to_string()), &widths);
    let total: usize = widths.iter().sum::<usize>() + 2 * (widths.len() - 1);
    out.push_str(&"-".repeat(total));
    out.push('\n');
    for row in rows {
        push_row(&mut out, row.into_iter(), &widths);
    }
    out
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.zip(widths.iter()).enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        line.push_str(&cell);
        let pad = width.saturating_sub(cell.chars().count());
        line.push_str(&" ".repeat(pad));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max {
        return s;
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, SemanticDocument};

    fn scored(name: &str, description: &str, stars: i64, score: f64) -> ScoredDocument {
        let mut metadata = Metadata::new();
        let s = |v: &str| MetadataValue::String(v.to_string());
        metadata.insert("name".to_string(), s(name));
        metadata.insert("full_name".to_string(), s(&format!("octo/{}", name)));
        metadata.insert("description".to_string(), s(description));
        metadata.insert("url".to_string(), s(&format!("https://github.com/octo/{}", name)));
        metadata.insert("topics".to_string(), s("cli tool"));
        metadata.insert("languages".to_string(), s("Go Shell"));
        metadata.insert("star_count".to_string(), MetadataValue::Integer(stars));
        ScoredDocument {
            document: SemanticDocument {
                id: format!("octo/{}", name),
                text: description.to_string(),
                metadata,
            },
            score,
        }
    }

    #[test]
    fn empty_results_message() {
        assert_eq!(format_results_table(&[]), "No results.\n");
    }

    #[test]
    fn table_has_header_and_one_line_per_result() {
        let table = format_results_table(&[
            scored("widget", "A tool", 9, 0.91),
            scored("gadget", "Another tool", 3, 0.42),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("#  SCORE"));
        assert!(lines[2].contains("octo/widget"));
        assert!(lines[2].contains("0.910"));
        assert!(lines[2].contains("https://github.com/octo/widget"));
        assert!(lines[2].contains("cli tool"));
        assert!(lines[2].contains("Go Shell"));
        assert!(lines[2].ends_with('9'));
        assert!(lines[3].starts_with("2  "));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let long = "x".repeat(200);
        let table = format_results_table(&[scored("big", &long, 1, 0.5)]);
        assert!(table.contains("..."));
        assert!(!table.contains(&long));
    }

    #[test]
    fn overrides_replace_config_values() {
        let config = Config::default();
        let rc = RetrievalOverrides {
            method: Some(SearchStrategy::SimilarityScoreThreshold),
            k: Some(7),
            threshold: Some(0.8),
            fetch_k: None,
        }
        .apply(&config);
        assert_eq!(rc.strategy, SearchStrategy::SimilarityScoreThreshold);
        assert_eq!(rc.k, 7);
        assert_eq!(rc.score_threshold, 0.8);
        assert_eq!(rc.fetch_k, 20);

        let rc = RetrievalOverrides {
            k: Some(50),
            ..RetrievalOverrides::default()
        }
        .apply(&config);
        assert_eq!(rc.fetch_k, 50);
    }

    #[test]
    fn missing_index_is_store_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = ensure_index_exists(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StarpilotError>(),
            Some(StarpilotError::StoreNotFound { .. })
        ));
    }
}
