//! Starred-repository fetcher for the GitHub GraphQL API.
//!
//! The HTTP layer sits behind [`GraphQlTransport`] so the paging, retry and
//! error classification logic in [`GitHubClient`] can be driven by a
//! scripted transport in tests.
//!
//! # Error classification
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 401 | `Authentication` |
//! | 429, or 403 with an exhausted rate limit | `RateLimit`, never retried |
//! | other 403 | `Authentication` |
//! | 5xx, network error | retried with exponential backoff, then `Fetch` |
//! | other 4xx | `Fetch` |
//! | GraphQL `RATE_LIMITED` | `RateLimit` |
//! | GraphQL `NOT_FOUND`, `user: null` | `Fetch` naming the user |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::config::GitHubConfig;
use crate::error::StarpilotError;
use crate::models::{RawRepoRecord, ReadmeFormat};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Page through a user's stars, newest first.
pub const STARRED_QUERY: &str = r#"
query Starred($login: String!, $first: Int!, $after: String, $withReadme: Boolean!) {
  user(login: $login) {
    starredRepositories(first: $first, after: $after, orderBy: {field: STARRED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        name
        nameWithOwner
        url
        homepageUrl
        description
        stargazerCount
        owner { login __typename }
        repositoryTopics(first: 20) { nodes { topic { name } } }
        primaryLanguage { name }
        languages(first: 20, orderBy: {field: SIZE, direction: DESC}) { nodes { name } }
        readmeMd: object(expression: "HEAD:README.md") @include(if: $withReadme) { ... on Blob { text } }
        readmeRst: object(expression: "HEAD:README.rst") @include(if: $withReadme) { ... on Blob { text } }
      }
    }
  }
}
"#;

/// Status, headers (lower-cased names) and body of one GraphQL POST.
#[derive(Debug, Clone)]
pub struct GraphQlResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Sends one GraphQL request. An `Err` means the request never produced an
/// HTTP response and is treated as transient.
#[async_trait]
pub trait GraphQlTransport: Send + Sync {
    async fn post(&self, query: &str, variables: &Value) -> Result<GraphQlResponse>;
}

/// [`GraphQlTransport`] over `reqwest` with bearer-token auth.
pub struct ReqwestTransport {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl ReqwestTransport {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("starpilot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl GraphQlTransport for ReqwestTransport {
    async fn post(&self, query: &str, variables: &Value) -> Result<GraphQlResponse> {
        let body = serde_json::json!({ "query": query, "variables": variables });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(GraphQlResponse {
            status,
            headers,
            body,
        })
    }
}

// ============ Response shapes ============

#[derive(Deserialize)]
struct StarredData {
    user: Option<StarredUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StarredUser {
    starred_repositories: StarredConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StarredConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepoNode>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RepoNode {
    name: Option<String>,
    name_with_owner: Option<String>,
    url: Option<String>,
    homepage_url: Option<String>,
    description: Option<String>,
    stargazer_count: Option<u64>,
    owner: Option<OwnerNode>,
    repository_topics: Option<Connection<TopicNode>>,
    primary_language: Option<NamedNode>,
    languages: Option<Connection<NamedNode>>,
    readme_md: Option<BlobNode>,
    readme_rst: Option<BlobNode>,
}

#[derive(Deserialize)]
struct OwnerNode {
    login: Option<String>,
    #[serde(rename = "__typename")]
    typename: Option<String>,
}

#[derive(Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Deserialize)]
struct TopicNode {
    topic: Option<NamedNode>,
}

#[derive(Deserialize)]
struct NamedNode {
    name: Option<String>,
}

#[derive(Deserialize)]
struct BlobNode {
    text: Option<String>,
}

impl From<RepoNode> for RawRepoRecord {
    fn from(node: RepoNode) -> Self {
        let (owner, organization) = match node.owner {
            Some(owner) => {
                let is_org = owner.typename.as_deref() == Some("Organization");
                let org = if is_org { owner.login.clone() } else { None };
                (owner.login, org)
            }
            None => (None, None),
        };

        let topics = node
            .repository_topics
            .map(|c| {
                c.nodes
                    .into_iter()
                    .flatten()
                    .filter_map(|t| t.topic.and_then(|n| n.name))
                    .collect()
            })
            .unwrap_or_default();

        let languages = node
            .languages
            .map(|c| c.nodes.into_iter().flatten().filter_map(|n| n.name).collect())
            .unwrap_or_default();

        let readme = node
            .readme_md
            .and_then(|b| b.text)
            .map(|t| (t, ReadmeFormat::Markdown))
            .or_else(|| {
                node.readme_rst
                    .and_then(|b| b.text)
                    .map(|t| (t, ReadmeFormat::Rst))
            });

        RawRepoRecord {
            name: node.name,
            full_name: node.name_with_owner,
            owner,
            organization,
            url: node.url,
            homepage_url: node.homepage_url,
            description: node.description,
            topics,
            primary_language: node.primary_language.and_then(|n| n.name),
            languages,
            star_count: node.stargazer_count.unwrap_or(0),
            readme,
        }
    }
}

// ============ Client ============

enum Attempt {
    Done(Value),
    Retry(String),
    Fail(StarpilotError),
}

/// Paginating, retrying client for a user's starred repositories.
pub struct GitHubClient {
    transport: Box<dyn GraphQlTransport>,
    page_size: u32,
    max_retries: u32,
    retry_base_delay: Duration,
    include_readmes: bool,
}

impl GitHubClient {
    pub fn new(transport: Box<dyn GraphQlTransport>, config: &GitHubConfig) -> Self {
        Self {
            transport,
            page_size: config.page_size,
            max_retries: config.max_retries.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            include_readmes: config.include_readmes,
        }
    }

    /// Build a client that talks to `config.api_url` with `token`.
    pub fn from_config(config: &GitHubConfig, token: &str) -> Result<Self> {
        let transport = ReqwestTransport::new(
            &config.api_url,
            token,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self::new(Box::new(transport), config))
    }

    pub fn with_readmes(mut self, include: bool) -> Self {
        self.include_readmes = include;
        self
    }

    /// Every repository `user` has starred, deduplicated, sorted by star
    /// count descending and truncated to `limit`.
    pub async fn fetch_starred_repos(
        &self,
        user: &str,
        limit: Option<usize>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<RawRepoRecord>> {
        let user = user.trim();
        if user.is_empty() {
            bail!(StarpilotError::Fetch("username must not be empty".to_string()));
        }

        let mut records = Vec::new();
        let mut after: Option<String> = None;
        let mut page = 0u64;

        loop {
            page += 1;
            let variables = serde_json::json!({
                "login": user,
                "first": self.page_size,
                "after": after,
                "withReadme": self.include_readmes,
            });

            let data = self.execute(user, &variables).await?;
            let connection = parse_page(user, data)?;

            records.extend(
                connection
                    .nodes
                    .into_iter()
                    .flatten()
                    .map(RawRepoRecord::from),
            );

            tracing::debug!("{}: page {} -> {} repos so far", user, page, records.len());
            progress.report(ProgressEvent::Fetching {
                user: user.to_string(),
                page,
                repos: records.len() as u64,
            });

            match (connection.page_info.has_next_page, connection.page_info.end_cursor) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }

        Ok(top_starred(records, limit))
    }

    async fn execute(&self, user: &str, variables: &Value) -> Result<Value> {
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * (1 << (attempt - 1).min(5));
                tracing::warn!(
                    "GitHub request failed ({}), retry {}/{} in {:?}",
                    last_err,
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.transport.post(STARRED_QUERY, variables).await {
                Ok(response) => classify(user, &response),
                Err(e) => Attempt::Retry(format!("{:#}", e)),
            };

            match outcome {
                Attempt::Done(data) => return Ok(data),
                Attempt::Retry(msg) => last_err = msg,
                Attempt::Fail(err) => return Err(err.into()),
            }
        }

        bail!(StarpilotError::Fetch(format!(
            "giving up after {} attempts: {}",
            self.max_retries + 1,
            last_err
        )))
    }
}

fn parse_page(user: &str, data: Value) -> Result<StarredConnection> {
    let data: StarredData = serde_json::from_value(data).map_err(|e| {
        StarpilotError::Fetch(format!("unexpected response shape for '{}': {}", user, e))
    })?;
    match data.user {
        Some(u) => Ok(u.starred_repositories),
        None => bail!(StarpilotError::Fetch(format!(
            "GitHub user '{}' not found",
            user
        ))),
    }
}

fn classify(user: &str, response: &GraphQlResponse) -> Attempt {
    let status = response.status;
    let body_lower = response.body.to_lowercase();

    if status == 401 {
        return Attempt::Fail(StarpilotError::Authentication(
            "GitHub rejected the token (401); check GITHUB_API_KEY".to_string(),
        ));
    }

    let remaining_zero = response
        .headers
        .get("x-ratelimit-remaining")
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    if status == 429 || (status == 403 && (remaining_zero || body_lower.contains("rate limit"))) {
        return Attempt::Fail(StarpilotError::RateLimit {
            reset_at: reset_time(response),
        });
    }

    if status == 403 {
        return Attempt::Fail(StarpilotError::Authentication(format!(
            "GitHub refused access (403): {}",
            response.body.trim()
        )));
    }
    if (500..600).contains(&status) {
        return Attempt::Retry(format!("server error {}", status));
    }
    if !(200..300).contains(&status) {
        return Attempt::Fail(StarpilotError::Fetch(format!(
            "GitHub API error {}: {}",
            status,
            response.body.trim()
        )));
    }

    let json: Value = match serde_json::from_str(&response.body) {
        Ok(v) => v,
        Err(e) => {
            return Attempt::Fail(StarpilotError::Fetch(format!(
                "invalid JSON from GitHub: {}",
                e
            )))
        }
    };

    if let Some(errors) = json.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Attempt::Fail(graphql_error(user, errors, response));
        }
    }

    match json.get("data") {
        Some(data) if !data.is_null() => Attempt::Done(data.clone()),
        _ => Attempt::Fail(StarpilotError::Fetch(
            "GitHub response carried no data".to_string(),
        )),
    }
}

fn graphql_error(user: &str, errors: &[Value], response: &GraphQlResponse) -> StarpilotError {
    let kind = |e: &Value| e.get("type").and_then(Value::as_str).map(str::to_string);

    if errors.iter().any(|e| kind(e).as_deref() == Some("RATE_LIMITED")) {
        return StarpilotError::RateLimit {
            reset_at: reset_time(response),
        };
    }
    if errors.iter().any(|e| kind(e).as_deref() == Some("NOT_FOUND")) {
        return StarpilotError::Fetch(format!("GitHub user '{}' not found", user));
    }

    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    StarpilotError::Fetch(format!("GitHub GraphQL error: {}", messages.join("; ")))
}

fn reset_time(response: &GraphQlResponse) -> Option<String> {
    let secs: i64 = response.headers.get("x-ratelimit-reset")?.trim().parse().ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

/// Drop repeated repositories (first occurrence wins), stable-sort by star
/// count descending, then keep at most `limit`.
///
/// Records without an identity are never treated as duplicates; the
/// normalizer reports them.
pub fn top_starred(records: Vec<RawRepoRecord>, limit: Option<usize>) -> Vec<RawRepoRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<RawRepoRecord> = records
        .into_iter()
        .filter(|r| match identity(r) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect();

    unique.sort_by_key(|r| Reverse(r.star_count));
    if let Some(limit) = limit {
        unique.truncate(limit);
    }
    unique
}

fn identity(record: &RawRepoRecord) -> Option<String> {
    let non_blank = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if let Some(full_name) = non_blank(&record.full_name) {
        return Some(full_name);
    }
    match (non_blank(&record.owner), non_blank(&record.name)) {
        (Some(owner), Some(name)) => Some(format!("{}/{}", owner, name)),
        _ => None,
    }
}
