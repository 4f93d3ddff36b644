//! Error taxonomy shared by every pipeline stage.
//!
//! Service clients convert their transport failures into
//! [`EngineError::EmbeddingUnavailable`] or
//! [`EngineError::GenerationUnavailable`] before returning, so the
//! retriever, assembler, and citation extractor only ever see these kinds.

use thiserror::Error;

/// Errors surfaced by the evidence engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Upload is not plain text or PDF. Terminal; no state is created.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Embedding service unreachable, timed out, or returned malformed output.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Generation service unreachable or timed out after bounded retries.
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    /// An index invariant was violated. Fatal for the operation only.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("evidence file not found: {0}")]
    DocumentNotFound(String),

    #[error("question cannot be empty")]
    EmptyQuestion,

    /// The file was accepted but no text could be extracted from it.
    #[error("no text could be extracted from {0}")]
    EmptyDocument(String),
}

impl EngineError {
    /// Text suitable for showing to the person asking questions.
    ///
    /// Never contains an answer; only states that evidence or a service is
    /// unavailable, or what the user must fix.
    pub fn user_message(&self) -> String {
        let message = self.describe();
        if self.is_transient() {
            format!("{} Try again shortly.", message)
        } else {
            message
        }
    }

    fn describe(&self) -> String {
        match self {
            EngineError::UnsupportedFileType(name) => format!(
                "'{}' can't be filed as evidence. Only text (.txt, .md) and PDF files are supported.",
                name
            ),
            EngineError::EmbeddingUnavailable(_) => {
                "The evidence index can't be searched right now.".to_string()
            }
            EngineError::GenerationUnavailable(_) => {
                "The evidence is accessible, but the detective is unavailable right now.".to_string()
            }
            EngineError::IndexInconsistency(_) => {
                "The evidence index hit an internal error. No answer was produced.".to_string()
            }
            EngineError::DocumentNotFound(name) => {
                format!("Evidence file '{}' not found.", name)
            }
            EngineError::EmptyQuestion => "Question cannot be empty.".to_string(),
            EngineError::EmptyDocument(name) => {
                format!("Could not extract any text from '{}'.", name)
            }
        }
    }

    /// True for failures caused by an external service that may recover.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::EmbeddingUnavailable(_) | EngineError::GenerationUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_message_mentions_evidence_accessible() {
        let msg = EngineError::GenerationUnavailable("timeout".into()).user_message();
        assert!(msg.contains("evidence is accessible"));
        assert!(!msg.contains("timeout"));
    }

    #[test]
    fn test_only_outages_suggest_retrying() {
        assert!(EngineError::EmbeddingUnavailable(String::new())
            .user_message()
            .ends_with("Try again shortly."));
        assert!(EngineError::GenerationUnavailable(String::new())
            .user_message()
            .ends_with("Try again shortly."));
        assert!(!EngineError::UnsupportedFileType("a.exe".into())
            .user_message()
            .contains("Try again"));
        assert!(!EngineError::EmptyQuestion.user_message().contains("Try again"));
    }
}
