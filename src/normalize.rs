//! Raw GitHub record → stable persisted schema.
//!
//! Normalization is a pure function: no I/O, no clock. Optional fields whose
//! value is absent, blank, or an empty list are dropped entirely, and the
//! synthetic `content` string is assembled from whatever survives.

use crate::error::StarpilotError;
use crate::models::{NormalizedRepoRecord, RawRepoRecord};

/// Normalize a single raw record.
///
/// Fails with [`StarpilotError::Schema`] only when `name`, `url`, or `owner`
/// is missing. A record with no description, topics, language, or README is
/// still returned; it simply has no `content`.
pub fn normalize_repo(raw: &RawRepoRecord) -> Result<NormalizedRepoRecord, StarpilotError> {
    let label = raw
        .full_name
        .as_deref()
        .or(raw.name.as_deref())
        .or(raw.url.as_deref())
        .unwrap_or("<unnamed>")
        .to_string();

    let name = required(&raw.name, &label, "name")?;
    let url = required(&raw.url, &label, "url")?;
    let owner = required(&raw.owner, &label, "owner")?;

    let full_name = non_empty(&raw.full_name).unwrap_or_else(|| format!("{}/{}", owner, name));
    let description = non_empty(&raw.description);
    let topics = non_empty_list(&raw.topics);
    let primary_language = non_empty(&raw.primary_language);
    let languages = non_empty_list(&raw.languages);

    let (readme_text, readme_format) = match &raw.readme {
        Some((text, format)) if !text.trim().is_empty() => (Some(text.clone()), Some(*format)),
        _ => (None, None),
    };

    let content = build_content(
        &name,
        description.as_deref(),
        &topics,
        primary_language.as_deref(),
    );

    Ok(NormalizedRepoRecord {
        name,
        full_name,
        owner,
        url,
        star_count: raw.star_count,
        organization: non_empty(&raw.organization),
        homepage_url: non_empty(&raw.homepage_url),
        description,
        topics,
        primary_language,
        languages,
        readme_text,
        readme_format,
        content,
    })
}

/// Normalize a batch, skipping (and logging) records that fail schema checks.
pub fn normalize_all(raws: &[RawRepoRecord]) -> Vec<NormalizedRepoRecord> {
    raws.iter()
        .filter_map(|raw| match normalize_repo(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("skipping record: {}", e);
                None
            }
        })
        .collect()
}

/// Join name, description, topics, and primary language with single spaces.
///
/// Returns `None` when nothing beyond the name is available, since a bare
/// name is not worth embedding.
pub fn build_content(
    name: &str,
    description: Option<&str>,
    topics: &[String],
    primary_language: Option<&str>,
) -> Option<String> {
    let topics_joined = topics.join(" ");
    let extras: Vec<&str> = [description, Some(topics_joined.as_str()), primary_language]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if extras.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(extras.len() + 1);
    parts.push(name.trim());
    parts.extend(extras);
    Some(parts.join(" "))
}

fn required(
    value: &Option<String>,
    label: &str,
    field: &'static str,
) -> Result<String, StarpilotError> {
    non_empty(value).ok_or_else(|| StarpilotError::Schema {
        repo: label.to_string(),
        field,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn non_empty_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadmeFormat;

    fn raw(name: &str) -> RawRepoRecord {
        RawRepoRecord {
            name: Some(name.to_string()),
            owner: Some("octo".to_string()),
            url: Some(format!("https://github.com/octo/{}", name)),
            ..Default::default()
        }
    }

    #[test]
    fn content_joins_fields_in_order() {
        let mut r = raw("widget");
        r.description = Some("A tool".to_string());
        r.topics = vec!["cli".to_string(), "tool".to_string()];
        r.primary_language = Some("Go".to_string());

        let n = normalize_repo(&r).unwrap();
        assert_eq!(n.content.as_deref(), Some("widget A tool cli tool Go"));
        assert_eq!(n.full_name, "octo/widget");
    }

    #[test]
    fn bare_record_keeps_only_required_keys() {
        let mut r = raw("bare");
        r.description = None;
        r.topics = vec![];
        r.primary_language = None;

        let n = normalize_repo(&r).unwrap();
        let json = serde_json::to_value(&n).unwrap();
        let mut keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["full_name", "name", "owner", "star_count", "url"]);
        assert!(!n.has_usable_content());
    }

    #[test]
    fn blank_values_are_dropped() {
        let mut r = raw("blanks");
        r.description = Some("   ".to_string());
        r.topics = vec!["".to_string(), " ".to_string()];
        r.primary_language = Some(String::new());
        r.languages = vec![String::new()];
        r.homepage_url = Some(String::new());
        r.readme = Some(("\n".to_string(), ReadmeFormat::Markdown));

        let n = normalize_repo(&r).unwrap();
        assert!(n.description.is_none());
        assert!(n.topics.is_empty());
        assert!(n.primary_language.is_none());
        assert!(n.languages.is_empty());
        assert!(n.homepage_url.is_none());
        assert!(n.readme_text.is_none());
        assert!(n.readme_format.is_none());
        assert!(n.content.is_none());
    }

    #[test]
    fn content_skips_missing_fields_without_gaps() {
        let mut r = raw("calcat");
        r.primary_language = Some("R".to_string());
        let n = normalize_repo(&r).unwrap();
        assert_eq!(n.content.as_deref(), Some("calcat R"));

        let mut r = raw("shot-by-cops");
        r.topics = vec!["data".to_string()];
        let n = normalize_repo(&r).unwrap();
        assert_eq!(n.content.as_deref(), Some("shot-by-cops data"));
    }

    #[test]
    fn content_has_no_stray_spaces() {
        let mut r = raw("spaced");
        r.description = Some("  padded description ".to_string());
        r.topics = vec![" a ".to_string(), "b".to_string()];
        let n = normalize_repo(&r).unwrap();
        let content = n.content.unwrap();
        assert_eq!(content, "spaced padded description a b");
        assert!(!content.contains("  "));
        assert_eq!(content.trim(), content);
    }

    #[test]
    fn readme_keeps_format() {
        let mut r = raw("django");
        r.readme = Some(("Django\n======".to_string(), ReadmeFormat::Rst));
        let n = normalize_repo(&r).unwrap();
        assert_eq!(n.readme_format, Some(ReadmeFormat::Rst));
        assert!(n.readme_text.unwrap().starts_with("Django"));
    }

    #[test]
    fn missing_required_field_is_schema_error() {
        let mut r = raw("nourl");
        r.url = None;
        let err = normalize_repo(&r).unwrap_err();
        assert!(matches!(err, StarpilotError::Schema { field: "url", .. }));

        let mut r = raw("noowner");
        r.owner = Some(" ".to_string());
        let err = normalize_repo(&r).unwrap_err();
        assert!(matches!(err, StarpilotError::Schema { field: "owner", .. }));
    }

    #[test]
    fn normalize_all_skips_bad_records() {
        let mut bad = raw("bad");
        bad.name = None;
        let records = normalize_all(&[raw("one"), bad, raw("two")]);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let mut r = raw("pytorch");
        r.full_name = Some("pytorch/pytorch".to_string());
        r.description = Some("Tensors and Dynamic neural networks".to_string());
        r.topics = vec!["deep-learning".to_string()];
        r.primary_language = Some("Python".to_string());
        r.languages = vec!["Python".to_string(), "C++".to_string()];
        r.organization = Some("pytorch".to_string());
        r.star_count = 80_000;
        r.readme = Some(("# PyTorch".to_string(), ReadmeFormat::Markdown));

        let first = normalize_repo(&r).unwrap();
        let json = serde_json::to_string(&first).unwrap();
        let reloaded: NormalizedRepoRecord = serde_json::from_str(&json).unwrap();
        let second = normalize_repo(&RawRepoRecord::from(&reloaded)).unwrap();
        assert_eq!(first, second);
    }
}
