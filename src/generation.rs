//! Generation service clients.
//!
//! Implementations of [`casefile_core::generation::Generator`]:
//! - **[`ChatCompletionsGenerator`]**: OpenAI-compatible
//!   `POST {url}/v1/chat/completions`. Serves both Groq (the default
//!   deployment, key in `GROQ_API_KEY`) and OpenAI (`OPENAI_API_KEY`).
//! - **[`OllamaGenerator`]**: `POST {url}/api/chat` with `stream: false`.
//! - **[`DisabledGenerator`]**: always unavailable.
//!
//! Retries never exceed [`MAX_GENERATION_RETRIES`], whatever the config says.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use casefile_core::generation::{Generator, MAX_GENERATION_RETRIES};
use casefile_core::prompt::GenerationRequest;
use casefile_core::EngineError;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::http::{self, RetryPolicy};

fn unavailable(msg: impl Into<String>) -> EngineError {
    EngineError::GenerationUnavailable(msg.into())
}

fn policy(config: &GenerationConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries.min(MAX_GENERATION_RETRIES),
        timeout: Duration::from_secs(config.timeout_secs),
    }
}

/// Used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, EngineError> {
        Err(unavailable("generation provider is disabled"))
    }
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct ChatCompletionsGenerator {
    service: &'static str,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl ChatCompletionsGenerator {
    /// Groq's OpenAI-compatible endpoint.
    pub fn groq(config: &GenerationConfig) -> Result<Self> {
        Self::build(config, "Groq", "GROQ_API_KEY", "https://api.groq.com/openai")
    }

    pub fn openai(config: &GenerationConfig) -> Result<Self> {
        Self::build(config, "OpenAI", "OPENAI_API_KEY", "https://api.openai.com")
    }

    fn build(
        config: &GenerationConfig,
        service: &'static str,
        key_var: &str,
        default_url: &str,
    ) -> Result<Self> {
        let api_key = std::env::var(key_var)
            .map_err(|_| anyhow!("{} environment variable not set", key_var))?;
        let policy = policy(config);
        let client = http::client(policy.timeout).map_err(|e| anyhow!(e))?;
        let url = config.url.clone().unwrap_or_else(|| default_url.to_string());

        Ok(Self {
            service,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            client,
            policy,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages(),
            "temperature": self.temperature,
        });
        let json = http::post_json(
            &self.client,
            self.service,
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            &self.policy,
        )
        .await
        .map_err(unavailable)?;

        let answer = parse_chat_completion(&json).map_err(unavailable)?;
        debug!(model = %self.model, chars = answer.len(), "generated answer");
        Ok(answer)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String, String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or("invalid chat completion response: missing choices[0].message.content")?;
    non_empty(content)
}

/// Client for a local Ollama chat endpoint.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let policy = policy(config);
        let client = http::client(policy.timeout).map_err(|e| anyhow!(e))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
            policy,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages(),
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = http::post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
            &self.policy,
        )
        .await
        .map_err(unavailable)?;

        let content = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| unavailable("invalid Ollama response: missing message.content"))?;
        non_empty(content).map_err(unavailable)
    }
}

fn non_empty(content: &str) -> Result<String, String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("generation service returned an empty answer".to_string());
    }
    Ok(trimmed.to_string())
}

/// Create the [`Generator`] named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "groq" => Ok(Arc::new(ChatCompletionsGenerator::groq(config)?)),
        "openai" => Ok(Arc::new(ChatCompletionsGenerator::openai(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_core::prompt::{assemble, Persona, PromptBudget};

    fn request() -> GenerationRequest {
        assemble("q?", &[], &Persona::default(), &[], &PromptBudget::default())
    }

    #[test]
    fn test_parse_chat_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  The warehouse. "}}]
        });
        assert_eq!(parse_chat_completion(&json).unwrap(), "The warehouse.");
    }

    #[test]
    fn test_empty_completion_is_an_error() {
        let json = serde_json::json!({"choices": [{"message": {"content": "   "}}]});
        assert!(parse_chat_completion(&json).is_err());
    }

    #[test]
    fn test_retries_capped() {
        let config = GenerationConfig {
            max_retries: 10,
            ..Default::default()
        };
        assert_eq!(policy(&config).max_retries, MAX_GENERATION_RETRIES);
    }

    #[tokio::test]
    async fn test_disabled_generator_is_unavailable() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_unavailable() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..Default::default()
        };
        let generator = create_generator(&config).unwrap();
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationUnavailable(_)));
    }
}
