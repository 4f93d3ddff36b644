//! Question → ranked evidence passages.
//!
//! The retriever embeds the question, asks the [`VectorIndex`] for the
//! `top_k` nearest entries, drops anything under `min_score`, and
//! deduplicates by chunk. An empty index is not an error: it yields no
//! passages, and the assembler turns that into an evidence-absence
//! instruction.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::EngineError;
use crate::index::{IndexSnapshot, SearchHit, VectorIndex};
use crate::models::RetrievedPassage;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetrievalParams {
    /// Nearest neighbours to fetch from the index.
    pub top_k: usize,
    /// Passages scoring below this cosine similarity are dropped.
    pub min_score: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.2,
        }
    }
}

/// Retrieve the passages most relevant to `question`.
///
/// # Errors
///
/// [`EngineError::EmbeddingUnavailable`] if the question cannot be
/// embedded. There is no keyword fallback.
pub async fn retrieve(
    provider: &dyn EmbeddingProvider,
    index: &VectorIndex,
    question: &str,
    params: &RetrievalParams,
) -> Result<Vec<RetrievedPassage>, EngineError> {
    if index.is_empty() {
        debug!("index is empty, no passages to retrieve");
        return Ok(Vec::new());
    }

    let query_vec = embed_one(provider, question).await?;
    let snapshot = index.snapshot();
    Ok(retrieve_from_snapshot(&snapshot, &query_vec, params))
}

/// The synchronous half of [`retrieve`]: rank, filter, and dedupe against
/// a fixed snapshot with a pre-computed query vector.
pub fn retrieve_from_snapshot(
    snapshot: &IndexSnapshot,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Vec<RetrievedPassage> {
    let hits = snapshot.search(query_vec, params.top_k);
    let candidates = hits.len();
    let passages = filter_hits(hits, params.min_score);
    debug!(
        candidates,
        kept = passages.len(),
        min_score = params.min_score,
        "retrieved passages"
    );
    passages
}

fn filter_hits(hits: Vec<SearchHit>, min_score: f32) -> Vec<RetrievedPassage> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| h.score >= min_score)
        .filter(|h| seen.insert(h.entry.chunk_id().to_string()))
        .map(|h| RetrievedPassage {
            chunk_id: h.entry.chunk_id().to_string(),
            document_id: h.entry.document_id.clone(),
            filename: h.entry.filename.clone(),
            text: h.entry.chunk.text.clone(),
            score: h.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::build_chunks;
    use crate::embedding::HashingEmbedder;
    use crate::models::IndexEntry;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl EmbeddingProvider for Unreachable {
        fn model_name(&self) -> &str {
            "unreachable"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            Err(EngineError::EmbeddingUnavailable("connection refused".into()))
        }
    }

    fn index_doc(index: &VectorIndex, e: &HashingEmbedder, doc: &str, file: &str, text: &str) {
        let entries = build_chunks(doc, text, 500, 50)
            .into_iter()
            .map(|mut c| {
                let v = e.embed_text(&c.text);
                c.embedding = Some(v.clone());
                IndexEntry {
                    id: c.id.clone(),
                    document_id: doc.to_string(),
                    filename: file.to_string(),
                    chunk: Arc::new(c),
                    vector: v,
                }
            })
            .collect();
        index.insert_batch(doc, file, entries).unwrap();
    }

    fn corpus(e: &HashingEmbedder) -> VectorIndex {
        let index = VectorIndex::new(e.dims());
        index_doc(&index, e, "d-a", "suspect_a.txt", "Suspect A was seen at the warehouse at 10pm");
        index_doc(&index, e, "d-b", "bank.txt", "Bank records show a large transfer in March");
        index_doc(&index, e, "d-c", "autopsy.txt", "The coroner found traces of arsenic in the tea");
        index
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_passages() {
        let index = VectorIndex::new(64);
        let passages = retrieve(&Unreachable, &index, "anything?", &RetrievalParams::default())
            .await
            .unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_matching_document_ranks_first() {
        let e = HashingEmbedder::new(384);
        let index = corpus(&e);
        let params = RetrievalParams {
            top_k: 5,
            min_score: -1.0,
        };
        let passages = retrieve(&e, &index, "Where was Suspect A seen?", &params)
            .await
            .unwrap();
        assert_eq!(passages[0].filename, "suspect_a.txt");
        for p in &passages[1..] {
            assert!(passages[0].score > p.score);
        }
    }

    #[tokio::test]
    async fn test_min_score_filters_irrelevant() {
        let e = HashingEmbedder::new(384);
        let index = corpus(&e);
        let params = RetrievalParams {
            top_k: 5,
            min_score: 0.3,
        };
        let passages = retrieve(&e, &index, "Where was Suspect A seen?", &params)
            .await
            .unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].filename, "suspect_a.txt");
    }

    #[tokio::test]
    async fn test_repeated_calls_same_order() {
        let e = HashingEmbedder::new(384);
        let index = corpus(&e);
        let params = RetrievalParams {
            top_k: 5,
            min_score: -1.0,
        };
        let first = retrieve(&e, &index, "who moved the money", &params).await.unwrap();
        for _ in 0..5 {
            let again = retrieve(&e, &index, "who moved the money", &params).await.unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_query() {
        let e = HashingEmbedder::new(64);
        let index = VectorIndex::new(64);
        index_doc(&index, &e, "d-a", "a.txt", "some evidence");
        let err = retrieve(&Unreachable, &index, "q", &RetrievalParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingUnavailable(_)));
    }
}
