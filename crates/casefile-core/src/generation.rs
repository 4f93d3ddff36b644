//! Generation service boundary.
//!
//! The generator is a pure transport: it sends an assembled
//! [`GenerationRequest`] and returns the raw answer text without
//! interpreting it. Concrete clients (OpenAI-compatible, Ollama) live in
//! the `casefile` app crate and are responsible for timeouts and bounded
//! retries.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::prompt::GenerationRequest;

/// Maximum retries a generator may make on transient transport failures.
pub const MAX_GENERATION_RETRIES: u32 = 2;

/// Trait for language-generation backends.
///
/// Called once per query. Every failure, including a timeout or an empty
/// response, must surface as [`EngineError::GenerationUnavailable`].
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"llama-3.1-8b-instant"`).
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError>;
}
