//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models locally via fastembed; no network calls after model download.
//!
//! Also provides the vector helpers used by the index:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "local-embeddings-fastembed")]
use std::sync::{Arc, Mutex};

use crate::config::{EmbeddingConfig, OPENAI_KEY_VAR};

/// Trait for embedding providers.
///
/// The retriever and index loader only see this trait, so tests can swap in
/// a deterministic provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in starpilot.toml.")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = std::env::var(OPENAI_KEY_VAR)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", OPENAI_KEY_VAR))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!("OpenAI embeddings returned {}, retrying", status);
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama embedding failed after retries")))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for local inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached.
/// After initial download, embeddings run entirely offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    /// Loaded on the first `embed` call and reused for every later batch.
    model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Validate early so a typo fails before any fetching happens.
        config_to_fastembed_model(&model_name)?;

        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let slot = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| {
                    anyhow::anyhow!("Failed to initialize local embedding model: {}", e)
                })?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;

            let embeddings = model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;

            Ok(embeddings)
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use starpilot::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
