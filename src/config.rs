//! TOML configuration and credential lookup.
//!
//! Every section has defaults, so running without a config file works out of
//! the box. Credentials never live in the TOML file; they are read from the
//! environment (optionally populated from the env file written by
//! `starpilot setup`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::StarpilotError;
use crate::retriever::SearchStrategy;

pub const GITHUB_TOKEN_VARS: [&str; 2] = ["GITHUB_API_KEY", "GITHUB_TOKEN"];
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const OPENAI_ORG_VAR: &str = "OPENAI_ORG_ID";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    #[serde(default = "default_vectorstore_dir")]
    pub vectorstore_dir: PathBuf,
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            vectorstore_dir: default_vectorstore_dir(),
            env_file: default_env_file(),
        }
    }
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("./repo_content")
}
fn default_vectorstore_dir() -> PathBuf {
    PathBuf::from("./vectorstore")
}
fn default_env_file() -> PathBuf {
    PathBuf::from("./.env")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_github_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_true")]
    pub include_readmes: bool,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_size: default_page_size(),
            max_retries: default_github_retries(),
            timeout_secs: default_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            include_readmes: true,
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com/graphql".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_github_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

/// Upper bound on `github.max_retries`.
pub const MAX_GITHUB_RETRIES: u32 = 10;

/// Which record field becomes the embedded text.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentText {
    /// The synthetic name + description + topics + language string.
    #[default]
    Content,
    /// The README, falling back to `content` when a repo has none.
    Readme,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocumentsConfig {
    #[serde(default)]
    pub text: DocumentText,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub method: SearchStrategy,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f64,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            method: SearchStrategy::default(),
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_k() -> usize {
    4
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda_mult() -> f64 {
    0.5
}
fn default_score_threshold() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            url: None,
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let invalid = |msg: String| -> Result<()> { Err(StarpilotError::Config(msg).into()) };

    if !(1..=100).contains(&config.github.page_size) {
        return invalid("github.page_size must be in 1..=100".to_string());
    }
    if !(1..=MAX_GITHUB_RETRIES).contains(&config.github.max_retries) {
        return invalid(format!(
            "github.max_retries must be in 1..={}",
            MAX_GITHUB_RETRIES
        ));
    }
    if config.documents.text == DocumentText::Readme && !config.github.include_readmes {
        return invalid(
            "documents.text = \"readme\" needs github.include_readmes = true".to_string(),
        );
    }

    let r = &config.retrieval;
    if r.k == 0 {
        return invalid("retrieval.k must be >= 1".to_string());
    }
    if r.fetch_k < r.k {
        return invalid(format!(
            "retrieval.fetch_k ({}) must be >= retrieval.k ({})",
            r.fetch_k, r.k
        ));
    }
    if !(0.0..=1.0).contains(&r.lambda_mult) {
        return invalid("retrieval.lambda_mult must be in [0.0, 1.0]".to_string());
    }
    if !(0.0..=1.0).contains(&r.score_threshold) {
        return invalid("retrieval.score_threshold must be in [0.0, 1.0]".to_string());
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        return invalid("embedding.batch_size must be >= 1".to_string());
    }
    match e.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                return invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                ));
            }
            if e.dims.is_none() || e.dims == Some(0) {
                return invalid(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    e.provider
                ));
            }
        }
        other => {
            return invalid(format!(
                "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
                other
            ))
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => {
            return invalid(format!(
                "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ))
        }
    }

    Ok(())
}

/// Read the GitHub token from the environment.
pub fn github_token() -> Result<String> {
    for var in GITHUB_TOKEN_VARS {
        if let Ok(token) = std::env::var(var) {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
    }
    bail!(StarpilotError::Authentication(
        "GITHUB_API_KEY is not set; run `starpilot setup` or export it".to_string()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.paths.content_dir, PathBuf::from("./repo_content"));
        assert_eq!(config.github.page_size, 100);
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.retrieval.method, SearchStrategy::Similarity);
        assert_eq!(config.documents.text, DocumentText::Content);
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/definitely/not/here/starpilot.toml")).unwrap();
        assert_eq!(config.retrieval.fetch_k, 20);
    }

    #[test]
    fn parses_method_wire_names() {
        let config = parse(
            r#"
            [retrieval]
            method = "similarity_score_threshold"
            score_threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(
            config.retrieval.method,
            SearchStrategy::SimilarityScoreThreshold
        );

        let config = parse("[retrieval]\nmethod = \"mmr\"\n").unwrap();
        assert_eq!(config.retrieval.method, SearchStrategy::Mmr);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = parse("[retrieval]\nscore_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("score_threshold"));
    }

    #[test]
    fn rejects_fetch_k_below_k() {
        let err = parse("[retrieval]\nk = 10\nfetch_k = 5\n").unwrap_err();
        assert!(err.to_string().contains("fetch_k"));
    }

    #[test]
    fn rejects_page_size_over_graphql_max() {
        let err = parse("[github]\npage_size = 101\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StarpilotError>(),
            Some(StarpilotError::Config(_))
        ));
    }

    #[test]
    fn remote_embeddings_need_model_and_dims() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let ok = parse(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn readmes_are_fetched_by_default() {
        let config = parse("").unwrap();
        assert!(config.github.include_readmes);
        assert!(Config::default().github.include_readmes);
    }

    #[test]
    fn readme_text_requires_fetching_readmes() {
        let err = parse("[github]\ninclude_readmes = false\n[documents]\ntext = \"readme\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("include_readmes"));

        let config = parse("[documents]\ntext = \"readme\"\n").unwrap();
        assert_eq!(config.documents.text, DocumentText::Readme);
    }

    #[test]
    fn rejects_unbounded_retry_budget() {
        let err = parse("[github]\nmax_retries = 40\n").unwrap_err();
        assert!(err.to_string().contains("github.max_retries"));
        assert!(parse("[github]\nmax_retries = 10\n").is_ok());
    }

    #[test]
    fn rejects_unknown_llm_provider() {
        let err = parse("[llm]\nprovider = \"gpt4all\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }
}
