//! Query interface over a persisted index.
//!
//! Three strategies are supported:
//!
//! | Strategy | Behaviour |
//! |----------|-----------|
//! | `similarity` | top-`k` documents by cosine similarity |
//! | `similarity_score_threshold` | up to `k` documents scoring `>= score_threshold`; may be empty |
//! | `mmr` | `k` documents picked from the top `fetch_k` by maximal marginal relevance |
//!
//! Ties are broken by index insertion order. An optional [`MetadataFilter`]
//! restricts the candidate set before any ranking happens.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use crate::config::RetrievalConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::{self, IndexInfo, IndexedDocument};
use crate::models::{Metadata, MetadataValue, ScoredDocument};

/// How the retriever picks documents for a query.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Similarity,
    #[value(name = "similarity_score_threshold")]
    SimilarityScoreThreshold,
    Mmr,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Similarity => "similarity",
            SearchStrategy::SimilarityScoreThreshold => "similarity_score_threshold",
            SearchStrategy::Mmr => "mmr",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved retrieval parameters for one query session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub strategy: SearchStrategy,
    pub k: usize,
    pub fetch_k: usize,
    pub lambda_mult: f64,
    pub score_threshold: f64,
}

impl From<&RetrievalConfig> for RetrieverConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            strategy: config.method,
            k: config.k,
            fetch_k: config.fetch_k,
            lambda_mult: config.lambda_mult,
            score_threshold: config.score_threshold,
        }
    }
}

impl RetrieverConfig {
    /// Reject parameter combinations that cannot produce a sensible query.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            bail!("k must be >= 1");
        }
        if self.strategy == SearchStrategy::Mmr && self.fetch_k < self.k {
            bail!("fetch_k ({}) must be >= k ({})", self.fetch_k, self.k);
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            bail!(
                "score threshold must be in [0.0, 1.0], got {}",
                self.score_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.lambda_mult) {
            bail!("lambda_mult must be in [0.0, 1.0], got {}", self.lambda_mult);
        }
        Ok(())
    }
}

// ============ Metadata filtering ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Comparator {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "==" => Some(Comparator::Eq),
            "ne" | "!=" => Some(Comparator::Ne),
            "gt" | ">" => Some(Comparator::Gt),
            "gte" | ">=" => Some(Comparator::Gte),
            "lt" | "<" => Some(Comparator::Lt),
            "lte" | "<=" => Some(Comparator::Lte),
            "contains" | "like" => Some(Comparator::Contains),
            _ => None,
        }
    }
}

/// One `attribute comparator value` test against document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub attribute: String,
    pub comparator: Comparator,
    pub value: MetadataValue,
}

impl Comparison {
    /// A missing attribute only satisfies `ne`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let actual = match metadata.get(&self.attribute) {
            Some(v) => v,
            None => return self.comparator == Comparator::Ne,
        };

        match self.comparator {
            Comparator::Eq => values_equal(actual, &self.value),
            Comparator::Ne => !values_equal(actual, &self.value),
            Comparator::Contains => {
                let haystack = actual.to_string().to_lowercase();
                let needle = self.value.to_string().to_lowercase();
                haystack.contains(&needle)
            }
            Comparator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Comparator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Comparator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (MetadataValue::Bool(x), MetadataValue::Bool(y)) => x == y,
            _ => a.to_string().eq_ignore_ascii_case(&b.to_string()),
        },
    }
}

fn compare(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        (None, None) => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.to_lowercase().cmp(&y.to_lowercase())),
            _ => None,
        },
        _ => None,
    }
}

/// A conjunction of comparisons. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub comparisons: Vec<Comparison>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.comparisons.iter().all(|c| c.matches(metadata))
    }
}

// ============ Ranking ============

/// Greedy maximal marginal relevance selection.
///
/// `query_scores[i]` is the similarity of candidate `i` to the query.
/// Returns up to `k` candidate positions in pick order. Each step picks
/// the candidate maximising
/// `lambda * sim(q, d) - (1 - lambda) * max(sim(d, p) for p in picked)`.
pub fn maximal_marginal_relevance(
    query_scores: &[f32],
    embeddings: &[&[f32]],
    k: usize,
    lambda_mult: f64,
) -> Vec<usize> {
    let lambda = lambda_mult as f32;
    let mut picked: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..query_scores.len()).collect();

    while picked.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &candidate) in remaining.iter().enumerate() {
            let redundancy = if picked.is_empty() {
                0.0
            } else {
                picked
                    .iter()
                    .map(|&p| embedding::cosine_similarity(embeddings[candidate], embeddings[p]))
                    .fold(f32::NEG_INFINITY, f32::max)
            };
            let score = lambda * query_scores[candidate] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        picked.push(remaining.remove(best_pos));
    }

    picked
}

/// Rank `documents` against an embedded query.
pub fn rank_documents(
    documents: &[IndexedDocument],
    query_vec: &[f32],
    config: &RetrieverConfig,
    filter: Option<&MetadataFilter>,
) -> Vec<ScoredDocument> {
    let mut scored: Vec<(&IndexedDocument, f32)> = documents
        .iter()
        .filter(|d| filter.map_or(true, |f| f.matches(&d.document.metadata)))
        .map(|d| (d, embedding::cosine_similarity(query_vec, &d.embedding)))
        .collect();

    // Stable: equal scores keep insertion order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let selected: Vec<(&IndexedDocument, f32)> = match config.strategy {
        SearchStrategy::Similarity => scored.into_iter().take(config.k).collect(),
        SearchStrategy::SimilarityScoreThreshold => scored
            .into_iter()
            .filter(|(_, s)| f64::from(*s) >= config.score_threshold)
            .take(config.k)
            .collect(),
        SearchStrategy::Mmr => {
            scored.truncate(config.fetch_k.max(config.k));
            let query_scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
            let embeddings: Vec<&[f32]> =
                scored.iter().map(|(d, _)| d.embedding.as_slice()).collect();
            maximal_marginal_relevance(&query_scores, &embeddings, config.k, config.lambda_mult)
                .into_iter()
                .map(|i| scored[i])
                .collect()
        }
    };

    selected
        .into_iter()
        .map(|(d, s)| ScoredDocument {
            document: d.document.clone(),
            score: f64::from(s),
        })
        .collect()
}

/// Filtered documents ordered by `star_count` descending, for queries with
/// no semantic component.
pub fn rank_by_stars(
    documents: &[IndexedDocument],
    k: usize,
    filter: Option<&MetadataFilter>,
) -> Vec<ScoredDocument> {
    let mut matching: Vec<&IndexedDocument> = documents
        .iter()
        .filter(|d| filter.map_or(true, |f| f.matches(&d.document.metadata)))
        .collect();

    let stars = |d: &IndexedDocument| {
        d.document
            .metadata
            .get("star_count")
            .and_then(MetadataValue::as_f64)
            .unwrap_or(0.0)
    };
    matching.sort_by(|a, b| stars(b).partial_cmp(&stars(a)).unwrap_or(Ordering::Equal));

    matching
        .into_iter()
        .take(k)
        .map(|d| ScoredDocument {
            document: d.document.clone(),
            score: 0.0,
        })
        .collect()
}

// ============ Retriever ============

/// A loaded index plus the embedding provider used to embed queries.
pub struct Retriever {
    config: RetrieverConfig,
    provider: Box<dyn EmbeddingProvider>,
    info: IndexInfo,
    documents: Vec<IndexedDocument>,
}

impl fmt::Debug for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .field("info", &self.info)
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl Retriever {
    /// Load the index at `index_dir`.
    ///
    /// Fails with `StoreNotFound` when no index exists, and refuses an index
    /// built with a different embedding model or dimension.
    pub async fn open(
        index_dir: &Path,
        config: RetrieverConfig,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let (info, documents) = index::load_index(index_dir).await?;

        if info.model != provider.model_name() {
            bail!(
                "index at {} was built with embedding model '{}' but '{}' is configured; re-run `starpilot read <user>`",
                index_dir.display(),
                info.model,
                provider.model_name()
            );
        }
        if info.dims != 0 && provider.dims() != 0 && info.dims != provider.dims() {
            bail!(
                "index at {} has {}-dimensional embeddings but the provider produces {}; re-run `starpilot read <user>`",
                index_dir.display(),
                info.dims,
                provider.dims()
            );
        }

        tracing::debug!(
            "opened index: {} documents, model {}, built {}",
            documents.len(),
            info.model,
            info.built_at
        );

        Ok(Self {
            config,
            provider,
            info,
            documents,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Run `query` with the configured strategy.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        self.retrieve_filtered(query, None).await
    }

    /// Run `query` against documents passing `filter`.
    ///
    /// A blank query skips embedding and ranks by star count instead.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>> {
        if query.trim().is_empty() {
            return Ok(rank_by_stars(&self.documents, self.config.k, filter));
        }

        let query_vec = embedding::embed_query(self.provider.as_ref(), query).await?;
        Ok(rank_documents(
            &self.documents,
            &query_vec,
            &self.config,
            filter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StarpilotError;
    use crate::models::SemanticDocument;

    fn indexed(id: &str, embedding: Vec<f32>, stars: i64) -> IndexedDocument {
        let mut metadata = Metadata::new();
        metadata.insert("name".to_string(), MetadataValue::String(id.to_string()));
        metadata.insert("star_count".to_string(), MetadataValue::Integer(stars));
        IndexedDocument {
            document: SemanticDocument {
                id: id.to_string(),
                text: format!("{} text", id),
                metadata,
            },
            embedding,
        }
    }

    fn config(strategy: SearchStrategy, k: usize) -> RetrieverConfig {
        RetrieverConfig {
            strategy,
            k,
            fetch_k: 20,
            lambda_mult: 0.5,
            score_threshold: 0.5,
        }
    }

    fn ids(results: &[ScoredDocument]) -> Vec<&str> {
        results.iter().map(|r| r.document.id.as_str()).collect()
    }

    #[test]
    fn strategy_wire_names() {
        use clap::ValueEnum;
        let parsed = SearchStrategy::from_str("similarity_score_threshold", false).unwrap();
        assert_eq!(parsed, SearchStrategy::SimilarityScoreThreshold);
        assert_eq!(SearchStrategy::from_str("mmr", false).unwrap(), SearchStrategy::Mmr);

        let json = serde_json::to_string(&SearchStrategy::SimilarityScoreThreshold).unwrap();
        assert_eq!(json, "\"similarity_score_threshold\"");
        assert_eq!(SearchStrategy::default(), SearchStrategy::Similarity);
    }

    #[test]
    fn similarity_returns_top_k_in_score_order() {
        let docs = vec![
            indexed("far", vec![0.0, 1.0], 1),
            indexed("near", vec![1.0, 0.1], 1),
            indexed("mid", vec![1.0, 1.0], 1),
        ];
        let results = rank_documents(&docs, &[1.0, 0.0], &config(SearchStrategy::Similarity, 2), None);
        assert_eq!(ids(&results), vec!["near", "mid"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let docs = vec![
            indexed("first", vec![1.0, 0.0], 1),
            indexed("second", vec![2.0, 0.0], 1),
            indexed("third", vec![3.0, 0.0], 1),
        ];
        let results = rank_documents(&docs, &[1.0, 0.0], &config(SearchStrategy::Similarity, 3), None);
        assert_eq!(ids(&results), vec!["first", "second", "third"]);
    }

    #[test]
    fn threshold_may_return_fewer_than_k() {
        let docs = vec![
            indexed("aligned", vec![1.0, 0.0], 1),
            indexed("orthogonal", vec![0.0, 1.0], 1),
        ];
        let mut cfg = config(SearchStrategy::SimilarityScoreThreshold, 4);
        let results = rank_documents(&docs, &[1.0, 0.0], &cfg, None);
        assert_eq!(ids(&results), vec!["aligned"]);

        cfg.score_threshold = 1.0;
        let results = rank_documents(&docs, &[0.0, -1.0], &cfg, None);
        assert!(results.is_empty());
    }

    #[test]
    fn mmr_prefers_diverse_results() {
        // Two near-duplicates and one distinct but still relevant document.
        let docs = vec![
            indexed("dup-a", vec![1.0, 0.0, 0.0], 1),
            indexed("dup-b", vec![0.99, 0.01, 0.0], 1),
            indexed("other", vec![0.7, 0.0, 0.7], 1),
        ];
        let query = [1.0, 0.0, 0.2];

        let plain = rank_documents(&docs, &query, &config(SearchStrategy::Similarity, 2), None);
        assert_eq!(ids(&plain), vec!["dup-a", "dup-b"]);

        let mmr = rank_documents(&docs, &query, &config(SearchStrategy::Mmr, 2), None);
        assert_eq!(ids(&mmr), vec!["dup-a", "other"]);
    }

    #[test]
    fn mmr_with_lambda_one_is_plain_similarity() {
        let scores = [0.9, 0.8, 0.1];
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        let picked = maximal_marginal_relevance(&scores, &[&a, &b, &c], 2, 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn mmr_never_exceeds_candidates() {
        let scores = [0.5];
        let a = [1.0f32];
        assert_eq!(maximal_marginal_relevance(&scores, &[&a], 5, 0.5), vec![0]);
        assert!(maximal_marginal_relevance(&[], &[], 3, 0.5).is_empty());
    }

    #[test]
    fn filter_applies_before_ranking() {
        let docs = vec![
            indexed("popular", vec![1.0, 0.0], 50_000),
            indexed("niche", vec![0.5, 0.5], 12),
        ];
        let filter = MetadataFilter {
            comparisons: vec![Comparison {
                attribute: "star_count".to_string(),
                comparator: Comparator::Lt,
                value: MetadataValue::Integer(100),
            }],
        };
        let results = rank_documents(
            &docs,
            &[1.0, 0.0],
            &config(SearchStrategy::Similarity, 4),
            Some(&filter),
        );
        assert_eq!(ids(&results), vec!["niche"]);
    }

    #[test]
    fn comparisons() {
        let mut meta = Metadata::new();
        meta.insert("topics".to_string(), MetadataValue::String("cli rust tui".to_string()));
        meta.insert("primary_language".to_string(), MetadataValue::String("Rust".to_string()));
        meta.insert("star_count".to_string(), MetadataValue::Integer(42));

        let cmp = |attribute: &str, comparator, value| Comparison {
            attribute: attribute.to_string(),
            comparator,
            value,
        };
        let s = |v: &str| MetadataValue::String(v.to_string());

        assert!(cmp("primary_language", Comparator::Eq, s("rust")).matches(&meta));
        assert!(cmp("primary_language", Comparator::Ne, s("Go")).matches(&meta));
        assert!(cmp("topics", Comparator::Contains, s("TUI")).matches(&meta));
        assert!(cmp("star_count", Comparator::Gte, MetadataValue::Integer(42)).matches(&meta));
        assert!(cmp("star_count", Comparator::Gt, MetadataValue::Float(41.5)).matches(&meta));
        assert!(!cmp("star_count", Comparator::Lt, MetadataValue::Integer(10)).matches(&meta));
        assert!(!cmp("star_count", Comparator::Gt, s("many")).matches(&meta));
        assert!(!cmp("organization", Comparator::Eq, s("rust-lang")).matches(&meta));
        assert!(cmp("organization", Comparator::Ne, s("rust-lang")).matches(&meta));
    }

    #[test]
    fn comparator_aliases() {
        assert_eq!(Comparator::parse("GTE"), Some(Comparator::Gte));
        assert_eq!(Comparator::parse("!="), Some(Comparator::Ne));
        assert_eq!(Comparator::parse("like"), Some(Comparator::Contains));
        assert_eq!(Comparator::parse("between"), None);
    }

    #[test]
    fn rank_by_stars_orders_descending() {
        let docs = vec![
            indexed("a", vec![1.0], 3),
            indexed("b", vec![1.0], 9),
            indexed("c", vec![1.0], 1),
            indexed("d", vec![1.0], 9),
        ];
        let results = rank_by_stars(&docs, 3, None);
        assert_eq!(ids(&results), vec!["b", "d", "a"]);
    }

    #[test]
    fn validate_rejects_bad_overrides() {
        let mut cfg = config(SearchStrategy::Mmr, 5);
        cfg.fetch_k = 2;
        assert!(cfg.validate().is_err());

        let mut cfg = config(SearchStrategy::SimilarityScoreThreshold, 5);
        cfg.score_threshold = -0.1;
        assert!(cfg.validate().is_err());

        assert!(config(SearchStrategy::Similarity, 0).validate().is_err());
    }

    #[tokio::test]
    async fn open_missing_index_fails_fast() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Retriever::open(
            &tmp.path().join("vectorstore"),
            config(SearchStrategy::Similarity, 4),
            Box::new(embedding::DisabledProvider),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StarpilotError>(),
            Some(StarpilotError::StoreNotFound { .. })
        ));
    }
}
