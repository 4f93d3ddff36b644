//! Embedding service clients.
//!
//! Concrete implementations of [`casefile_core::embedding::EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: always fails; retrieval then reports the
//!   embedding service as unavailable.
//! - **[`OpenAIProvider`]**: `POST {url}/v1/embeddings`, any OpenAI-compatible server.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama.
//! - **[`HuggingFaceProvider`]**: the Hugging Face feature-extraction API,
//!   mean-pooling token-level output.
//! - **`LocalProvider`**: fastembed in-process (feature `local-embeddings`).
//! - [`HashingEmbedder`]: deterministic and offline, the default.
//!
//! Remote providers share the retry policy in [`crate::http`]. Every
//! failure surfaces as [`EngineError::EmbeddingUnavailable`].

#[cfg(feature = "local-embeddings")]
mod local_fastembed;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use casefile_core::embedding::{EmbeddingProvider, HashingEmbedder};
use casefile_core::EngineError;

use crate::config::{EmbeddingConfig, DEFAULT_HASHING_DIMS};
use crate::http::{self, RetryPolicy};

#[cfg(feature = "local-embeddings")]
pub use local_fastembed::LocalProvider;

fn unavailable(msg: impl Into<String>) -> EngineError {
    EngineError::EmbeddingUnavailable(msg.into())
}

fn policy(config: &EmbeddingConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        timeout: Duration::from_secs(config.timeout_secs),
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", config.provider))
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .filter(|d| *d > 0)
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", config.provider))
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Err(unavailable("embedding provider is disabled"))
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY`. `embedding.url` points it at any
/// OpenAI-compatible server.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config)?;
        let dims = required_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let policy = policy(config);
        let client = http::client(policy.timeout).map_err(|e| anyhow!(e))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
            policy,
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
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            "OpenAI embeddings",
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            &self.policy,
        )
        .await
        .map_err(unavailable)?;
        parse_openai_response(&json).map_err(unavailable)
    }
}

/// Extract `data[].embedding`, ordered by `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("invalid OpenAI response: missing data array")?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or("invalid OpenAI response: missing embedding")?;
        indexed.push((index, to_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Default URL is `http://localhost:11434`; the model must already be pulled.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config)?;
        let dims = required_dims(config)?;
        let policy = policy(config);
        let client = http::client(policy.timeout).map_err(|e| anyhow!(e))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client,
            policy,
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
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            "Ollama embeddings",
            &format!("{}/api/embed", self.url),
            None,
            &body,
            &self.policy,
        )
        .await
        .map_err(unavailable)?;
        parse_ollama_response(&json).map_err(unavailable)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, String> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or("invalid Ollama response: missing embeddings array")?
        .iter()
        .map(to_vector)
        .collect()
}

// ============ Hugging Face Provider ============

/// Embedding provider for the Hugging Face feature-extraction API.
///
/// Requires `HF_API_TOKEN`. One request per text; models that return one
/// vector per token are mean-pooled into a single vector.
pub struct HuggingFaceProvider {
    model: String,
    dims: usize,
    url: String,
    token: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HuggingFaceProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config)?;
        let dims = required_dims(config)?;
        let token = std::env::var("HF_API_TOKEN")
            .map_err(|_| anyhow!("HF_API_TOKEN environment variable not set"))?;
        let policy = policy(config);
        let client = http::client(policy.timeout).map_err(|e| anyhow!(e))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api-inference.huggingface.co".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            token,
            client,
            policy,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let endpoint = format!("{}/models/{}", self.url, self.model);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = serde_json::json!({
                "inputs": text,
                "options": { "wait_for_model": true },
            });
            let json = http::post_json(
                &self.client,
                "Hugging Face feature extraction",
                &endpoint,
                Some(&self.token),
                &body,
                &self.policy,
            )
            .await
            .map_err(unavailable)?;
            out.push(parse_feature_extraction(&json).map_err(unavailable)?);
        }
        Ok(out)
    }
}

/// Accepts a sentence vector, a token matrix, or a batch of one token
/// matrix. Token matrices are mean-pooled.
fn parse_feature_extraction(json: &serde_json::Value) -> Result<Vec<f32>, String> {
    let outer = json
        .as_array()
        .ok_or("invalid feature-extraction response: expected an array")?;
    match outer.first() {
        None => Err("invalid feature-extraction response: empty array".to_string()),
        Some(v) if v.is_number() => to_vector(json),
        Some(v) if v.as_array().and_then(|a| a.first()).is_some_and(|x| x.is_array()) => {
            if outer.len() != 1 {
                return Err("invalid feature-extraction response: unexpected batch".to_string());
            }
            parse_feature_extraction(v)
        }
        Some(_) => {
            let rows = outer.iter().map(to_vector).collect::<Result<Vec<_>, _>>()?;
            mean_pool(&rows)
        }
    }
}

fn mean_pool(rows: &[Vec<f32>]) -> Result<Vec<f32>, String> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    if width == 0 || rows.iter().any(|r| r.len() != width) {
        return Err("invalid feature-extraction response: ragged token matrix".to_string());
    }
    let mut sum = vec![0.0f32; width];
    for row in rows {
        for (acc, x) in sum.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let n = rows.len() as f32;
    Ok(sum.into_iter().map(|x| x / n).collect())
}

fn to_vector(value: &serde_json::Value) -> Result<Vec<f32>, String> {
    value
        .as_array()
        .ok_or("invalid embedding: not an array")?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| "invalid embedding: non-numeric component".to_string())
        })
        .collect()
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"huggingface"` | [`HuggingFaceProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        ))),
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "huggingface" => Ok(Arc::new(HuggingFaceProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
