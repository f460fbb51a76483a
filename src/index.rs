//! Persisted vector index.
//!
//! The index is a SQLite database (`index.sqlite`) inside the vector-store
//! directory. Each row holds a document's text, its sanitized metadata as
//! JSON, and its embedding as a little-endian f32 blob. Rebuilding always
//! replaces the whole directory; there is no incremental update.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;

use crate::cache;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::StarpilotError;
use crate::migrate;
use crate::models::{Metadata, SemanticDocument};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Facts recorded about an index when it was built.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub model: String,
    pub dims: usize,
    pub built_at: String,
    pub document_count: usize,
}

/// A stored document together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub document: SemanticDocument,
    pub embedding: Vec<f32>,
}

/// Embed `documents` and write a fresh index at `dir`, replacing any old one.
///
/// The index is assembled in a staging directory and only swapped into place
/// once every document has been embedded and written.
pub async fn build_index(
    dir: &Path,
    documents: &[SemanticDocument],
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<IndexInfo> {
    let documents = dedupe(documents);
    let staging = cache::staging_dir(dir)?;

    let result = write_index(&staging, &documents, provider, batch_size.max(1), progress).await;
    match result {
        Ok(info) => {
            cache::replace_dir(&staging, dir)?;
            Ok(info)
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

fn dedupe(documents: &[SemanticDocument]) -> Vec<&SemanticDocument> {
    let mut seen = HashSet::new();
    documents
        .iter()
        .filter(|doc| {
            let fresh = seen.insert(doc.id.as_str());
            if !fresh {
                tracing::warn!("skipping duplicate document '{}'", doc.id);
            }
            fresh
        })
        .collect()
}

async fn write_index(
    staging: &Path,
    documents: &[&SemanticDocument],
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<IndexInfo> {
    let pool = db::connect(staging, true).await?;
    migrate::run_migrations(&pool).await?;

    let total = documents.len() as u64;
    let mut embedded = 0u64;
    let mut dims: Option<usize> = None;

    for batch in documents.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let vectors = provider
            .embed(&texts)
            .await
            .with_context(|| format!("embedding failed for batch starting at '{}'", batch[0].id))?;

        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} documents",
                vectors.len(),
                batch.len()
            );
        }

        let mut tx = pool.begin().await?;
        for (doc, vector) in batch.iter().zip(vectors.iter()) {
            match dims {
                None => dims = Some(vector.len()),
                Some(d) if d != vector.len() => bail!(
                    "embedding for '{}' has {} dimensions, expected {}",
                    doc.id,
                    vector.len(),
                    d
                ),
                Some(_) => {}
            }

            let metadata_json = serde_json::to_string(&doc.metadata)?;
            sqlx::query(
                "INSERT INTO documents (doc_key, text, metadata_json, embedding, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.text)
            .bind(&metadata_json)
            .bind(embedding::vec_to_blob(vector))
            .bind(hash_text(&doc.text))
            .execute(&mut *tx)
            .await
            .map_err(|e| StarpilotError::Write {
                record: doc.id.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
        }
        tx.commit().await?;

        embedded += batch.len() as u64;
        progress.report(ProgressEvent::Embedding {
            n: embedded,
            total,
        });
    }

    let info = IndexInfo {
        model: provider.model_name().to_string(),
        dims: dims.unwrap_or_else(|| provider.dims()),
        built_at: chrono::Utc::now().to_rfc3339(),
        document_count: documents.len(),
    };
    write_meta(&pool, &info).await?;

    pool.close().await;
    Ok(info)
}

async fn write_meta(pool: &SqlitePool, info: &IndexInfo) -> Result<()> {
    let entries = [
        ("model", info.model.clone()),
        ("dims", info.dims.to_string()),
        ("built_at", info.built_at.clone()),
        ("document_count", info.document_count.to_string()),
    ];
    for (key, value) in entries {
        sqlx::query(
            r#"
            INSERT INTO index_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Load the whole index at `dir`, in insertion order.
///
/// Fails with [`StarpilotError::StoreNotFound`] before touching SQLite when
/// the index has never been built.
pub async fn load_index(dir: &Path) -> Result<(IndexInfo, Vec<IndexedDocument>)> {
    if !dir.join(db::INDEX_DB_FILE).is_file() {
        bail!(StarpilotError::StoreNotFound {
            path: dir.to_path_buf()
        });
    }

    let pool = db::connect(dir, false).await?;

    let meta_rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(&pool)
        .await?;
    let mut info = IndexInfo {
        model: String::new(),
        dims: 0,
        built_at: String::new(),
        document_count: 0,
    };
    for row in &meta_rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            "model" => info.model = value,
            "dims" => info.dims = value.parse().unwrap_or(0),
            "built_at" => info.built_at = value,
            "document_count" => info.document_count = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let rows = sqlx::query(
        "SELECT doc_key, text, metadata_json, embedding FROM documents ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;

    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc_key: String = row.get("doc_key");
        let metadata_json: String = row.get("metadata_json");
        let blob: Vec<u8> = row.get("embedding");
        let metadata: Metadata = serde_json::from_str(&metadata_json)
            .with_context(|| format!("corrupt metadata for '{}'", doc_key))?;

        documents.push(IndexedDocument {
            document: SemanticDocument {
                id: doc_key,
                text: row.get("text"),
                metadata,
            },
            embedding: embedding::blob_to_vec(&blob),
        });
    }

    pool.close().await;
    Ok((info, documents))
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
