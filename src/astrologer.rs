//! `starpilot astrologer`: self-querying retrieval.
//!
//! The LLM rewrites a natural-language request into a structured query,
//! a semantic search string plus metadata comparisons and an optional
//! limit, which is then run against the index.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::llm::{self, ChatMessage, ChatModel};
use crate::models::MetadataValue;
use crate::retriever::{Comparator, Comparison, MetadataFilter};
use crate::search::{self, RetrievalOverrides};

/// Metadata attributes the model may filter on, with descriptions.
pub const FILTER_ATTRIBUTES: [(&str, &str, &str); 9] = [
    ("name", "string", "Repository name"),
    ("full_name", "string", "owner/name of the repository"),
    ("owner", "string", "Login of the user or organization owning the repository"),
    ("organization", "string", "Owning organization, absent for personal repositories"),
    ("description", "string", "Short description of the repository"),
    ("topics", "string", "Space-separated GitHub topics"),
    ("primary_language", "string", "Main programming language"),
    ("languages", "string", "Space-separated programming languages used"),
    ("star_count", "integer", "Number of GitHub stars"),
];

/// A parsed, validated structured query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredQuery {
    /// Text to match semantically; empty means "filter only".
    pub query: String,
    pub filter: MetadataFilter,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
struct RawStructuredQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    filter: Option<Vec<RawComparison>>,
    #[serde(default)]
    limit: Option<Value>,
}

#[derive(Deserialize)]
struct RawComparison {
    attribute: String,
    comparator: String,
    value: Value,
}

pub fn build_query_prompt(request: &str) -> Vec<ChatMessage> {
    let mut attributes = String::new();
    for (name, kind, description) in FILTER_ATTRIBUTES {
        attributes.push_str(&format!("- {} ({}): {}\n", name, kind, description));
    }

    let system = format!(
        "Your goal is to structure the user's query to match the request schema below.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"query\": string, \"filter\": [{{\"attribute\": string, \"comparator\": string, \"value\": string|number|boolean}}], \"limit\": integer|null}}\n\n\
         \"query\" is the text to compare to repository contents. Leave it empty if the request only \
         constrains metadata. Do not repeat filter conditions in the query.\n\
         \"filter\" lists conditions that must all hold. Allowed comparators: eq, ne, gt, gte, lt, lte, contains. \
         Use an empty list when there are no conditions.\n\
         \"limit\" is the number of repositories requested, or null.\n\n\
         Repositories have these attributes:\n{}",
        attributes
    );

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("User query: {}", request.trim())),
    ]
}

/// Parse the model's reply into a [`StructuredQuery`].
///
/// Accepts bare JSON or JSON wrapped in a Markdown code fence. Comparisons
/// naming unknown attributes or comparators are dropped with a warning.
pub fn parse_structured_query(reply: &str) -> Result<StructuredQuery> {
    let json = extract_json(reply)
        .ok_or_else(|| anyhow!("LLM reply did not contain a JSON object: {}", reply.trim()))?;
    let raw: RawStructuredQuery = serde_json::from_str(json)
        .map_err(|e| anyhow!("LLM reply is not a valid structured query: {}", e))?;

    let mut comparisons = Vec::new();
    for c in raw.filter.unwrap_or_default() {
        if !FILTER_ATTRIBUTES.iter().any(|(name, _, _)| *name == c.attribute) {
            tracing::warn!("dropping filter on unknown attribute '{}'", c.attribute);
            continue;
        }
        let Some(comparator) = Comparator::parse(&c.comparator) else {
            tracing::warn!("dropping filter with unknown comparator '{}'", c.comparator);
            continue;
        };
        let Some(value) = scalar_value(&c.value) else {
            tracing::warn!("dropping filter on '{}': value {} is not a scalar", c.attribute, c.value);
            continue;
        };
        comparisons.push(Comparison {
            attribute: c.attribute,
            comparator,
            value,
        });
    }

    let limit = match raw.limit {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| *n > 0);

    Ok(StructuredQuery {
        query: raw.query.unwrap_or_default().trim().to_string(),
        filter: MetadataFilter { comparisons },
        limit,
    })
}

fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn scalar_value(value: &Value) -> Option<MetadataValue> {
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

pub async fn construct_query(chat: &dyn ChatModel, request: &str) -> Result<StructuredQuery> {
    let reply = chat.complete(&build_query_prompt(request)).await?;
    tracing::debug!("structured query reply: {}", reply);
    parse_structured_query(&reply)
}

pub async fn run_astrologer(config: &Config, request: &str, k: Option<usize>) -> Result<()> {
    search::ensure_index_exists(&config.paths.vectorstore_dir)?;

    let chat = llm::create_chat_model(&config.llm)?;
    let structured = construct_query(chat.as_ref(), request).await?;
    tracing::info!(
        "structured query: {:?} with {} filter(s), limit {:?}",
        structured.query,
        structured.filter.comparisons.len(),
        structured.limit
    );

    let rc = RetrievalOverrides {
        k: k.or(structured.limit),
        ..RetrievalOverrides::default()
    }
    .apply(config);
    rc.validate()?;

    let retriever = search::open_retriever(config, rc).await?;
    let filter = (!structured.filter.is_empty()).then_some(&structured.filter);
    let results = retriever
        .retrieve_filtered(&structured.query, filter)
        .await?;

    search::print_results(&results);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn parses_fenced_reply() {
        let reply = r#"Sure! Here it is:
```json
{
  "query": "terminal file manager",
  "filter": [
    {"attribute": "primary_language", "comparator": "eq", "value": "Rust"},
    {"attribute": "star_count", "comparator": "gte", "value": 1000}
  ],
  "limit": 5
}
```"#;
        let q = parse_structured_query(reply).unwrap();
        assert_eq!(q.query, "terminal file manager");
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.filter.comparisons.len(), 2);
        assert_eq!(q.filter.comparisons[1].comparator, Comparator::Gte);
        assert_eq!(q.filter.comparisons[1].value, MetadataValue::Integer(1000));
    }

    #[test]
    fn drops_unknown_attributes_and_comparators() {
        let reply = r#"{"query": "", "filter": [
            {"attribute": "license", "comparator": "eq", "value": "MIT"},
            {"attribute": "topics", "comparator": "between", "value": "a"},
            {"attribute": "topics", "comparator": "contains", "value": ["a"]},
            {"attribute": "topics", "comparator": "contains", "value": "neovim"}
        ], "limit": null}"#;
        let q = parse_structured_query(reply).unwrap();
        assert_eq!(q.query, "");
        assert_eq!(q.limit, None);
        assert_eq!(
            q.filter.comparisons,
            vec![Comparison {
                attribute: "topics".to_string(),
                comparator: Comparator::Contains,
                value: MetadataValue::String("neovim".to_string()),
            }]
        );
    }

    #[test]
    fn missing_fields_default() {
        let q = parse_structured_query(r#"{"query": "  vector databases "}"#).unwrap();
        assert_eq!(q.query, "vector databases");
        assert!(q.filter.is_empty());
        assert_eq!(q.limit, None);

        let q = parse_structured_query(r#"{"query": "x", "filter": null, "limit": "3"}"#).unwrap();
        assert_eq!(q.limit, Some(3));
    }

    #[test]
    fn rejects_reply_without_json() {
        assert!(parse_structured_query("I cannot help with that.").is_err());
        assert!(parse_structured_query("{ not json }").is_err());
    }

    #[test]
    fn prompt_lists_every_attribute() {
        let messages = build_query_prompt("rust tuis");
        for (name, _, _) in FILTER_ATTRIBUTES {
            assert!(messages[0].content.contains(name));
        }
        assert_eq!(messages[1].content, "User query: rust tuis");
    }

    struct CannedChat(&'static str);

    #[async_trait]
    impl ChatModel for CannedChat {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn construct_query_uses_model_reply() {
        let chat = CannedChat(
            r#"{"query": "", "filter": [{"attribute": "owner", "comparator": "eq", "value": "sharkdp"}], "limit": 2}"#,
        );
        let q = construct_query(&chat, "sharkdp's tools").await.unwrap();
        assert_eq!(q.filter.comparisons[0].attribute, "owner");
        assert_eq!(q.limit, Some(2));
    }
}
