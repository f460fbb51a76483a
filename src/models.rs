//! Core data models used throughout starpilot.
//!
//! These types represent the repository records, documents, and search
//! results that flow through the fetch → prepare → query pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Markup of a fetched README.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadmeFormat {
    Markdown,
    Rst,
}

/// A starred repository as returned by the GitHub API, before normalization.
///
/// Every field is optional here; [`crate::normalize::normalize_repo`] decides
/// which absences are fatal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRepoRecord {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub owner: Option<String>,
    pub organization: Option<String>,
    pub url: Option<String>,
    pub homepage_url: Option<String>,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub primary_language: Option<String>,
    pub languages: Vec<String>,
    pub star_count: u64,
    pub readme: Option<(String, ReadmeFormat)>,
}

/// The stable, persisted shape of a repository.
///
/// Optional fields are omitted from the serialized JSON when absent; they
/// are never written as `null`, `""`, or `[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRepoRecord {
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub url: String,
    pub star_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_format: Option<ReadmeFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NormalizedRepoRecord {
    /// False when the record carries nothing beyond its name, URL, and owner.
    pub fn has_usable_content(&self) -> bool {
        self.content.is_some()
    }
}

impl From<&NormalizedRepoRecord> for RawRepoRecord {
    fn from(record: &NormalizedRepoRecord) -> Self {
        RawRepoRecord {
            name: Some(record.name.clone()),
            full_name: Some(record.full_name.clone()),
            owner: Some(record.owner.clone()),
            organization: record.organization.clone(),
            url: Some(record.url.clone()),
            homepage_url: record.homepage_url.clone(),
            description: record.description.clone(),
            topics: record.topics.clone(),
            primary_language: record.primary_language.clone(),
            languages: record.languages.clone(),
            star_count: record.star_count,
            readme: match (&record.readme_text, record.readme_format) {
                (Some(text), Some(format)) => Some((text.clone(), format)),
                (Some(text), None) => Some((text.clone(), ReadmeFormat::Markdown)),
                _ => None,
            },
        }
    }
}

/// A scalar metadata value accepted by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

/// Scalar-only metadata, ordered by key for deterministic storage.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A text payload plus metadata, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticDocument {
    /// Stable identifier, normally `owner/name`.
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// A document returned from the retriever along with its relevance score.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: SemanticDocument,
    /// Cosine similarity between query and document embeddings.
    pub score: f64,
}

impl ScoredDocument {
    /// Look up a string metadata field.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.document.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_value_untagged_json() {
        let values: Vec<MetadataValue> =
            serde_json::from_str(r#"[true, 42, 1.5, "rust"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                MetadataValue::Bool(true),
                MetadataValue::Integer(42),
                MetadataValue::Float(1.5),
                MetadataValue::String("rust".to_string()),
            ]
        );
    }

    #[test]
    fn absent_fields_not_serialized() {
        let record = NormalizedRepoRecord {
            name: "bare".to_string(),
            full_name: "someone/bare".to_string(),
            owner: "someone".to_string(),
            url: "https://github.com/someone/bare".to_string(),
            star_count: 0,
            organization: None,
            homepage_url: None,
            description: None,
            topics: Vec::new(),
            primary_language: None,
            languages: Vec::new(),
            readme_text: None,
            readme_format: None,
            content: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 5, "unexpected keys: {:?}", keys);
        assert!(!record.has_usable_content());
    }
}
