//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait every embedding backend
//! implements, the batching/validation boundary [`embed_batched`], and the
//! offline [`HashingEmbedder`].
//!
//! Network-backed providers (OpenAI-compatible, Ollama, Hugging Face) live
//! in the `casefile` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::EngineError;

/// Trait for embedding providers.
///
/// Implementations must return one vector per input, in input order, and
/// must convert every transport failure into
/// [`EngineError::EmbeddingUnavailable`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the configured vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

/// Embed `texts` in batches of `batch_size` and validate the results.
///
/// Every batch must come back with the same number of vectors as inputs,
/// each of exactly `provider.dims()` finite components. Anything else is
/// reported as [`EngineError::EmbeddingUnavailable`]; malformed vectors
/// never reach the index.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EngineError> {
    let dims = provider.dims();
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "expected {} vectors from {}, got {}",
                batch.len(),
                provider.model_name(),
                vectors.len()
            )));
        }
        for v in &vectors {
            validate_vector(v, dims)?;
        }
        debug!(
            model = provider.model_name(),
            batch = batch.len(),
            "embedded batch"
        );
        out.extend(vectors);
    }

    Ok(out)
}

/// Embed a single text, typically a question.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, EngineError> {
    embed_batched(provider, &[text.to_string()], 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::EmbeddingUnavailable("empty embedding response".into()))
}

fn validate_vector(v: &[f32], dims: usize) -> Result<(), EngineError> {
    if v.len() != dims {
        return Err(EngineError::EmbeddingUnavailable(format!(
            "dimension mismatch: expected {}, got {}",
            dims,
            v.len()
        )));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::EmbeddingUnavailable(
            "vector contains non-finite values".into(),
        ));
    }
    Ok(())
}

/// Scale a vector to unit length.
///
/// Zero vectors are returned unchanged; they score `0.0` against
/// everything.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Inner product of two equal-length vectors.
///
/// Equals cosine similarity when both inputs are unit-normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Deterministic, offline embedder based on feature hashing.
///
/// Each lower-cased alphanumeric token adds `1.0` to the bucket selected
/// by the first eight bytes of its SHA-256 digest. Texts that share words
/// point in similar directions, which is enough for development, demos,
/// and tests without an embedding service.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lower-cased alphanumeric word tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortVectors;

    #[async_trait]
    impl EmbeddingProvider for ShortVectors {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct DropsOne;

    #[async_trait]
    impl EmbeddingProvider for DropsOne {
        fn model_name(&self) -> &str {
            "drops-one"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn test_normalized_self_dot_is_one() {
        let v = normalize(&[1.0, 2.0, 3.0]);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_orthogonal_and_mismatched() {
        assert!(dot(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert_eq!(dot(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_normalized_dot_is_cosine() {
        // |(3,4,0)| = 5, |(1,2,2)| = 3, raw dot = 11
        let d = dot(&normalize(&[3.0, 4.0, 0.0]), &normalize(&[1.0, 2.0, 2.0]));
        assert!((d - 11.0 / 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_hashing_embedder_shared_words_are_closer() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_text("Where was Suspect A seen?");
        let hit = e.embed_text("Suspect A was seen at the warehouse at 10pm");
        let miss = e.embed_text("Bank records show a large transfer in March");
        let (q, hit, miss) = (normalize(&q), normalize(&hit), normalize(&miss));
        assert!(dot(&q, &hit) > dot(&q, &miss));
    }

    #[tokio::test]
    async fn test_embed_batched_preserves_order_across_batches() {
        let e = HashingEmbedder::new(64);
        let texts: Vec<String> = (0..7).map(|i| format!("exhibit {}", i)).collect();
        let vectors = embed_batched(&e, &texts, 3).await.unwrap();
        assert_eq!(vectors.len(), 7);
        for (t, v) in texts.iter().zip(vectors.iter()) {
            assert_eq!(&e.embed_text(t), v);
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_embedding_unavailable() {
        let err = embed_batched(&ShortVectors, &["a".to_string()], 8)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_embedding_unavailable() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_batched(&DropsOne, &texts, 8).await.unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingUnavailable(_)));
    }
}
