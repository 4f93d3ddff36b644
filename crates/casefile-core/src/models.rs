//! Core data models used throughout casefile.
//!
//! These types represent the documents, chunks, index entries, and
//! retrieval results that flow through the ingestion and query pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// An evidence document held by the ingestion coordinator.
///
/// Immutable once stored; a new upload under the same filename replaces
/// it wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub raw_text: String,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded contiguous slice of a document, the unit of embedding and
/// retrieval.
///
/// `start_offset..end_offset` is a byte range into the parent document's
/// `raw_text`; `text` is exactly that slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// SHA-256 of `text`, used to decide whether a stored embedding is stale.
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Build the stable chunk id for a document position.
    ///
    /// Zero-padded so lexical order matches document order, which the
    /// index relies on for its tie-break.
    pub fn make_id(document_id: &str, chunk_index: usize) -> String {
        format!("{}:{:05}", document_id, chunk_index)
    }
}

/// The searchable unit: a chunk's unit-normalized vector plus a
/// back-reference to the chunk and the file it came from.
///
/// Holding the chunk behind an `Arc` means an entry can never outlive the
/// chunk it points at.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub chunk: Arc<Chunk>,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

/// A ranked passage returned for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub score: f32,
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A source the answer was attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub filename: String,
    pub chunk_id: String,
    /// Leading excerpt of the passage text for display.
    pub excerpt: String,
}

/// One turn of a conversation. Lifecycle is owned by the caller; the
/// engine only produces assistant turns' content and sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub cited_sources: Vec<SourceRef>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            cited_sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, cited_sources: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            cited_sources,
        }
    }
}

/// Per-document ingestion state.
///
/// Happy path is `Pending → Chunked → Embedded → Indexed`. `Failed` is
/// reachable from every non-terminal state. `Indexed` and `Failed` are
/// terminal; a retry is a fresh ingestion starting again at `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestState {
    Pending,
    Chunked,
    Embedded,
    Indexed,
    Failed,
}

impl IngestState {
    /// Move to `next`, rejecting any backwards or skipping transition.
    pub fn advance(self, next: IngestState) -> Result<IngestState, EngineError> {
        use IngestState::*;
        let ok = matches!(
            (self, next),
            (Pending, Chunked)
                | (Chunked, Embedded)
                | (Embedded, Indexed)
                | (Pending, Failed)
                | (Chunked, Failed)
                | (Embedded, Failed)
        );
        if ok {
            Ok(next)
        } else {
            Err(EngineError::IndexInconsistency(format!(
                "illegal ingestion transition {} -> {}",
                self, next
            )))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Indexed | IngestState::Failed)
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestState::Pending => "pending",
            IngestState::Chunked => "chunked",
            IngestState::Embedded => "embedded",
            IngestState::Indexed => "indexed",
            IngestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let s = IngestState::Pending;
        let s = s.advance(IngestState::Chunked).unwrap();
        let s = s.advance(IngestState::Embedded).unwrap();
        let s = s.advance(IngestState::Indexed).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn test_failed_reachable_from_every_live_state() {
        for s in [
            IngestState::Pending,
            IngestState::Chunked,
            IngestState::Embedded,
        ] {
            assert_eq!(s.advance(IngestState::Failed).unwrap(), IngestState::Failed);
        }
    }

    #[test]
    fn test_transitions_are_one_way() {
        assert!(IngestState::Embedded.advance(IngestState::Chunked).is_err());
        assert!(IngestState::Indexed.advance(IngestState::Failed).is_err());
        assert!(IngestState::Failed.advance(IngestState::Pending).is_err());
        assert!(IngestState::Pending.advance(IngestState::Indexed).is_err());
    }

    #[test]
    fn test_chunk_ids_sort_in_document_order() {
        let a = Chunk::make_id("doc", 9);
        let b = Chunk::make_id("doc", 10);
        assert!(a < b);
    }
}
