//! Chat-completion backends used by `fortuneteller` and `astrologer`.
//!
//! Failures are returned as-is; there is no retry. A missing model or an API
//! error is shown to the user directly.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::{LlmConfig, OPENAI_KEY_VAR, OPENAI_ORG_VAR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Send the conversation and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("LLM provider is disabled. Set [llm] provider in starpilot.toml.")
    }
}

// ============ OpenAI ============

/// `POST {url}/chat/completions`. Sends `OPENAI_ORG_ID` as the
/// `OpenAI-Organization` header when set.
pub struct OpenAIChat {
    model: String,
    url: String,
    api_key: String,
    organization: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(OPENAI_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "{} is not set; run `starpilot setup` or export it",
                    OPENAI_KEY_VAR
                )
            })?;
        let organization = std::env::var(OPENAI_ORG_VAR)
            .ok()
            .filter(|o| !o.trim().is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            organization,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await.context("OpenAI request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_reply(&json)
    }
}

fn parse_openai_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

/// `POST {url}/api/chat` with `stream: false`.
pub struct OllamaChat {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone().unwrap_or_else(|| "mistral".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_reply(&json)
    }
}

fn parse_ollama_reply(json: &serde_json::Value) -> Result<String> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama error: {}", err);
    }
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
}

/// Create the configured [`ChatModel`].
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
        ])
        .unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"], "hi");
    }

    #[test]
    fn parses_openai_reply() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Use ripgrep.\n"}}]
        });
        assert_eq!(parse_openai_reply(&json).unwrap(), "Use ripgrep.");
        assert!(parse_openai_reply(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn parses_ollama_reply_and_error() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "fzf"}, "done": true});
        assert_eq!(parse_ollama_reply(&json).unwrap(), "fzf");

        let err = parse_ollama_reply(&serde_json::json!({"error": "model 'mistral' not found"}))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn disabled_chat_errors() {
        let err = DisabledChat
            .complete(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "gpt4all".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_chat_model(&config).is_err());
    }
}
