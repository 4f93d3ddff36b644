//! TOML configuration.
//!
//! Every section has defaults, so a missing config file yields a working
//! offline setup (hashing embedder, generation disabled). API keys are
//! read from the environment, optionally populated from a `.env` file.

use anyhow::{bail, Context, Result};
use casefile_core::prompt::{Persona, PromptBudget};
use casefile_core::retrieve::RetrievalParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub citation: CitationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k,
            min_score: self.min_score,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_min_score() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
    #[serde(default = "default_history_turns")]
    pub max_history_turns: usize,
    #[serde(default)]
    pub persona_name: Option<String>,
    #[serde(default)]
    pub persona_instruction: Option<String>,
    #[serde(default)]
    pub no_evidence_reply: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: default_context_budget(),
            max_history_turns: default_history_turns(),
            persona_name: None,
            persona_instruction: None,
            no_evidence_reply: None,
        }
    }
}

impl PromptConfig {
    pub fn budget(&self) -> PromptBudget {
        PromptBudget {
            context_chars: self.context_budget_chars,
            max_history_turns: self.max_history_turns,
        }
    }

    /// The default detective persona with any configured overrides.
    pub fn persona(&self) -> Persona {
        let mut persona = Persona::default();
        if let Some(name) = &self.persona_name {
            persona.name = name.clone();
        }
        if let Some(instruction) = &self.persona_instruction {
            persona.instruction = instruction.clone();
        }
        if let Some(reply) = &self.no_evidence_reply {
            persona.no_evidence_reply = reply.clone();
        }
        persona
    }
}

fn default_context_budget() -> usize {
    6000
}
fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitationConfig {
    #[serde(default = "default_min_overlap")]
    pub min_overlap: f64,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            min_overlap: default_min_overlap(),
        }
    }
}

fn default_min_overlap() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

/// Dimensionality used by the hashing embedder when `dims` is unset.
pub const DEFAULT_HASHING_DIMS: usize = 384;

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvidenceConfig {
    #[serde(default = "default_evidence_dir")]
    pub dir: PathBuf,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: default_evidence_dir(),
        }
    }
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("./evidence")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load and validate the config at `path`.
///
/// A missing file is not an error: defaults are used.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    if config.prompt.context_budget_chars == 0 {
        bail!("prompt.context_budget_chars must be > 0");
    }

    if !(0.0..=1.0).contains(&config.citation.min_overlap) {
        bail!("citation.min_overlap must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "hashing" | "local" | "disabled" => {}
        "openai" | "ollama" | "huggingface" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, ollama, huggingface, local, or disabled.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "groq" | "openai" | "ollama" | "disabled" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be groq, openai, ollama, or disabled.",
            other
        ),
    }
    if config.generation.timeout_secs == 0 || config.embedding.timeout_secs == 0 {
        bail!("timeout_secs must be > 0; external calls always need a timeout");
    }

    Ok(())
}
