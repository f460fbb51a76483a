//! Cached records → embeddable documents.
//!
//! The vector store only accepts scalar metadata, so list-valued fields are
//! flattened here and anything else non-scalar is dropped with a warning.

use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;

use crate::cache;
use crate::config::DocumentText;
use crate::models::{Metadata, MetadataValue, SemanticDocument};

/// Record keys that carry document text rather than metadata.
const TEXT_KEYS: [&str; 2] = ["content", "readme_text"];

/// Read every cached record in `dir` and emit one document per record with
/// non-empty text, in file-name order.
pub fn prepare_documents(dir: &Path, text: DocumentText) -> Result<Vec<SemanticDocument>> {
    let records = cache::load_records(dir)?;
    let mut documents = Vec::with_capacity(records.len());

    for (file_name, record) in records {
        match document_from_record(&file_name, record, text) {
            Some(doc) => documents.push(doc),
            None => tracing::warn!("skipping {}: no text to embed", file_name),
        }
    }

    Ok(documents)
}

/// Build a document from one cached record, or `None` if its text is empty.
pub fn document_from_record(
    file_name: &str,
    mut record: Map<String, Value>,
    text: DocumentText,
) -> Option<SemanticDocument> {
    let content = take_text(&mut record, "content");
    let readme = take_text(&mut record, "readme_text");

    let body = match text {
        DocumentText::Content => content,
        DocumentText::Readme => readme.or(content),
    }?;

    let id = ["full_name", "name"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| file_name.trim_end_matches(".json").to_string());

    for key in TEXT_KEYS {
        record.remove(key);
    }

    Some(SemanticDocument {
        id,
        text: body,
        metadata: sanitize_metadata(record),
    })
}

fn take_text(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Keep scalar values, flatten scalar lists with a space, drop the rest.
pub fn sanitize_metadata(record: Map<String, Value>) -> Metadata {
    let mut metadata = Metadata::new();

    for (key, value) in record {
        match value {
            Value::Array(items) => match flatten_list(&items) {
                Some(joined) if !joined.is_empty() => {
                    metadata.insert(key, MetadataValue::String(joined));
                }
                Some(_) => {}
                None => tracing::warn!("dropping metadata '{}': list holds non-scalar values", key),
            },
            other => match scalar(&other) {
                Some(v) => {
                    metadata.insert(key, v);
                }
                None => tracing::warn!("dropping metadata '{}': unsupported value {}", key, other),
            },
        }
    }

    metadata
}

fn scalar(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::String(s) => Some(MetadataValue::String(s.clone())),
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(MetadataValue::Integer(i)),
            None => n.as_f64().map(MetadataValue::Float),
        },
        _ => None,
    }
}

fn flatten_list(items: &[Value]) -> Option<String> {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let part = scalar(item)?.to_string();
        if !part.trim().is_empty() {
            parts.push(part);
        }
    }
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn lists_are_space_joined() {
        let meta = sanitize_metadata(as_map(json!({
            "topics": ["cli", "tool"],
            "languages": ["Go", "Shell"],
            "star_count": 9,
            "archived": false,
            "ratio": 0.25,
        })));
        assert_eq!(meta["topics"], MetadataValue::String("cli tool".to_string()));
        assert_eq!(meta["languages"], MetadataValue::String("Go Shell".to_string()));
        assert_eq!(meta["star_count"], MetadataValue::Integer(9));
        assert_eq!(meta["archived"], MetadataValue::Bool(false));
        assert_eq!(meta["ratio"], MetadataValue::Float(0.25));
    }

    #[test]
    fn non_scalars_are_dropped() {
        let meta = sanitize_metadata(as_map(json!({
            "owner": {"login": "octo"},
            "nested": [["a"], ["b"]],
            "mixed": ["a", {"b": 1}],
            "nothing": null,
            "empty": [],
            "name": "kept",
        })));
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["name"], MetadataValue::String("kept".to_string()));
    }

    #[test]
    fn every_value_is_scalar() {
        let meta = sanitize_metadata(as_map(json!({
            "a": [1, 2.5, true, "x"],
            "b": {"deep": [1]},
            "c": "s",
        })));
        for value in meta.values() {
            assert!(matches!(
                value,
                MetadataValue::String(_)
                    | MetadataValue::Integer(_)
                    | MetadataValue::Float(_)
                    | MetadataValue::Bool(_)
            ));
        }
        assert_eq!(meta["a"], MetadataValue::String("1 2.5 true x".to_string()));
    }

    #[test]
    fn text_fields_leave_metadata() {
        let doc = document_from_record(
            "widget.json",
            as_map(json!({
                "name": "widget",
                "full_name": "octo/widget",
                "content": "widget A tool",
                "readme_text": "# Widget",
            })),
            DocumentText::Content,
        )
        .unwrap();
        assert_eq!(doc.id, "octo/widget");
        assert_eq!(doc.text, "widget A tool");
        assert!(!doc.metadata.contains_key("content"));
        assert!(!doc.metadata.contains_key("readme_text"));
    }

    #[test]
    fn readme_mode_falls_back_to_content() {
        let with_readme = as_map(json!({"name": "a", "content": "a b", "readme_text": "# A"}));
        let without = as_map(json!({"name": "b", "content": "b c"}));

        let a = document_from_record("a.json", with_readme, DocumentText::Readme).unwrap();
        let b = document_from_record("b.json", without, DocumentText::Readme).unwrap();
        assert_eq!(a.text, "# A");
        assert_eq!(b.text, "b c");
    }

    #[test]
    fn empty_text_is_skipped() {
        let bare = as_map(json!({"name": "bare", "url": "u", "owner": "o", "star_count": 1}));
        assert!(document_from_record("bare.json", bare, DocumentText::Content).is_none());

        let blank = as_map(json!({"name": "blank", "content": "   "}));
        assert!(document_from_record("blank.json", blank, DocumentText::Readme).is_none());
    }

    #[test]
    fn prepare_is_deterministic_and_never_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("zeta.json"), r#"{"name":"zeta","content":"zeta z"}"#).unwrap();
        std::fs::write(dir.join("alpha.json"), r#"{"name":"alpha","content":"alpha a"}"#).unwrap();
        std::fs::write(dir.join("bare.json"), r#"{"name":"bare"}"#).unwrap();

        let first = prepare_documents(&dir, DocumentText::Content).unwrap();
        let second = prepare_documents(&dir, DocumentText::Content).unwrap();
        assert_eq!(first, second);

        let ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(first.iter().all(|d| !d.text.trim().is_empty()));
    }
}
