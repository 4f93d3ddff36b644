//! In-memory vector index with per-document atomic mutation.
//!
//! The index is a map from document id to an immutable segment of
//! [`IndexEntry`] values, published as one [`IndexSnapshot`] behind an
//! `Arc`. Writers build a new snapshot and swap it in; readers clone the
//! current `Arc` and scan it without holding any lock. A search therefore
//! sees every entry of a document or none of them, never a partial set.
//!
//! Search is a brute-force scan over unit-normalized vectors, so the
//! inner product is the cosine similarity. Results are ordered by score
//! (descending) and, for scores equal within [`SCORE_EPSILON`], by
//! ascending chunk id.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::embedding::{dot, normalize};
use crate::error::EngineError;
use crate::models::IndexEntry;

/// Scores closer than this are treated as ties.
pub const SCORE_EPSILON: f32 = 1e-6;

/// All entries for one document.
#[derive(Debug)]
pub struct Segment {
    pub document_id: String,
    pub filename: String,
    pub entries: Vec<Arc<IndexEntry>>,
}

/// An immutable view of the whole index at one point in time.
#[derive(Debug, Default, Clone)]
pub struct IndexSnapshot {
    segments: BTreeMap<String, Arc<Segment>>,
}

/// A search result: an entry and its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Arc<IndexEntry>,
    pub score: f32,
}

impl IndexSnapshot {
    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.segments.values().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.values().all(|s| s.entries.is_empty())
    }

    pub fn document_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, document_id: &str) -> Option<&Arc<Segment>> {
        self.segments.get(document_id)
    }

    /// The `k` entries most similar to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let q = normalize(query);

        let mut hits: Vec<SearchHit> = self
            .segments
            .values()
            .flat_map(|seg| seg.entries.iter())
            .map(|entry| SearchHit {
                entry: Arc::clone(entry),
                score: dot(&q, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            score_key(b.score)
                .cmp(&score_key(a.score))
                .then_with(|| a.entry.chunk_id().cmp(b.entry.chunk_id()))
        });
        hits.truncate(k);
        hits
    }
}

/// Quantize a score so ties within epsilon compare equal and the
/// ordering stays total.
fn score_key(score: f32) -> i64 {
    (score as f64 / SCORE_EPSILON as f64).round() as i64
}

/// The shared, concurrently readable vector index.
pub struct VectorIndex {
    dims: usize,
    current: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// The current snapshot. Cheap; later mutations do not affect it.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Rank entries of the current snapshot against `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.snapshot().search(query, k)
    }

    /// Add one entry to its document's segment, replacing any entry with
    /// the same id.
    pub fn insert(&self, entry: IndexEntry) -> Result<(), EngineError> {
        let document_id = entry.document_id.clone();
        let entry = self.prepare(&document_id, entry)?;
        self.mutate(|snap| {
            let (filename, mut entries) = match snap.segments.get(&entry.document_id) {
                Some(seg) => (seg.filename.clone(), seg.entries.clone()),
                None => (entry.filename.clone(), Vec::new()),
            };
            entries.retain(|e| e.id != entry.id);
            entries.push(Arc::new(entry.clone()));
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            snap.segments.insert(
                entry.document_id.clone(),
                Arc::new(Segment {
                    document_id: entry.document_id.clone(),
                    filename,
                    entries,
                }),
            );
        });
        Ok(())
    }

    /// Replace all of a document's entries in one atomic swap.
    ///
    /// Either every entry is published or, if any entry is invalid, the
    /// index is left untouched. Returns the number of entries published.
    pub fn insert_batch(
        &self,
        document_id: &str,
        filename: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, EngineError> {
        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                return Err(self.inconsistency(format!(
                    "duplicate entry {} in batch for {}",
                    entry.id, document_id
                )));
            }
            prepared.push(Arc::new(self.prepare(document_id, entry)?));
        }
        prepared.sort_by(|a, b| a.id.cmp(&b.id));
        let count = prepared.len();

        self.mutate(|snap| {
            snap.segments.insert(
                document_id.to_string(),
                Arc::new(Segment {
                    document_id: document_id.to_string(),
                    filename: filename.to_string(),
                    entries: prepared,
                }),
            );
        });
        debug!(document_id, filename, entries = count, "published index segment");
        Ok(count)
    }

    /// Remove all of a document's entries in one atomic swap.
    ///
    /// Returns `false` if the document had no entries.
    pub fn remove(&self, document_id: &str) -> bool {
        let mut removed = false;
        self.mutate(|snap| {
            removed = snap.segments.remove(document_id).is_some();
        });
        if removed {
            debug!(document_id, "removed index segment");
        }
        removed
    }

    fn mutate(&self, f: impl FnOnce(&mut IndexSnapshot)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = IndexSnapshot::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Validate an entry against its batch and normalize its vector.
    fn prepare(&self, document_id: &str, mut entry: IndexEntry) -> Result<IndexEntry, EngineError> {
        if entry.document_id != document_id || entry.chunk.document_id != document_id {
            return Err(self.inconsistency(format!(
                "entry {} belongs to {} but was indexed under {}",
                entry.id, entry.chunk.document_id, document_id
            )));
        }
        if entry.id != entry.chunk.id {
            return Err(self.inconsistency(format!(
                "entry {} does not match its chunk {}",
                entry.id, entry.chunk.id
            )));
        }
        if entry.vector.len() != self.dims {
            return Err(self.inconsistency(format!(
                "entry {} has {} dims, index expects {}",
                entry.id,
                entry.vector.len(),
                self.dims
            )));
        }
        entry.vector = normalize(&entry.vector);
        Ok(entry)
    }

    fn inconsistency(&self, msg: String) -> EngineError {
        error!(reason = %msg, "index invariant violated");
        EngineError::IndexInconsistency(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn entry(doc: &str, file: &str, idx: usize, vector: Vec<f32>) -> IndexEntry {
        let chunk = Chunk {
            id: Chunk::make_id(doc, idx),
            document_id: doc.to_string(),
            chunk_index: idx,
            text: format!("{} passage {}", file, idx),
            start_offset: 0,
            end_offset: 1,
            hash: String::new(),
            embedding: Some(vector.clone()),
        };
        IndexEntry {
            id: chunk.id.clone(),
            document_id: doc.to_string(),
            filename: file.to_string(),
            chunk: Arc::new(chunk),
            vector,
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<String> {
        hits.iter().map(|h| h.entry.id.clone()).collect()
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new(2);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_ranked_by_cosine() {
        let index = VectorIndex::new(2);
        index
            .insert_batch(
                "d1",
                "a.txt",
                vec![
                    entry("d1", "a.txt", 0, vec![0.0, 1.0]),
                    entry("d1", "a.txt", 1, vec![10.0, 1.0]),
                ],
            )
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(ids(&hits), vec!["d1:00001", "d1:00000"]);
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn test_ties_break_by_ascending_chunk_id() {
        let index = VectorIndex::new(2);
        index
            .insert_batch("b", "b.txt", vec![entry("b", "b.txt", 0, vec![1.0, 1.0])])
            .unwrap();
        index
            .insert_batch("a", "a.txt", vec![entry("a", "a.txt", 0, vec![2.0, 2.0])])
            .unwrap();
        let hits = index.search(&[1.0, 1.0], 2);
        assert_eq!(ids(&hits), vec!["a:00000", "b:00000"]);
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = VectorIndex::new(3);
        for d in ["x", "y", "z"] {
            let entries = (0..4)
                .map(|i| entry(d, "f.txt", i, vec![1.0, i as f32, 0.5]))
                .collect();
            index.insert_batch(d, "f.txt", entries).unwrap();
        }
        let first = ids(&index.search(&[1.0, 1.0, 1.0], 6));
        for _ in 0..10 {
            assert_eq!(ids(&index.search(&[1.0, 1.0, 1.0], 6)), first);
        }
    }

    #[test]
    fn test_insert_batch_replaces_document() {
        let index = VectorIndex::new(2);
        index
            .insert_batch(
                "d1",
                "a.txt",
                vec![
                    entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                    entry("d1", "a.txt", 1, vec![1.0, 0.0]),
                ],
            )
            .unwrap();
        index
            .insert_batch("d1", "a.txt", vec![entry("d1", "a.txt", 0, vec![0.0, 1.0])])
            .unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_invalid_batch_leaves_index_untouched() {
        let index = VectorIndex::new(2);
        index
            .insert_batch("d1", "a.txt", vec![entry("d1", "a.txt", 0, vec![1.0, 0.0])])
            .unwrap();
        let err = index
            .insert_batch(
                "d1",
                "a.txt",
                vec![
                    entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                    entry("d1", "a.txt", 1, vec![1.0, 0.0, 0.0]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexInconsistency(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_foreign_entry_rejected() {
        let index = VectorIndex::new(2);
        let err = index
            .insert_batch("d1", "a.txt", vec![entry("d2", "b.txt", 0, vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexInconsistency(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_single_insert_appends_to_segment() {
        let index = VectorIndex::new(2);
        index.insert(entry("d1", "a.txt", 1, vec![1.0, 0.0])).unwrap();
        index.insert(entry("d1", "a.txt", 0, vec![1.0, 0.0])).unwrap();
        index.insert(entry("d1", "a.txt", 0, vec![0.0, 1.0])).unwrap();
        let snap = index.snapshot();
        let seg = snap.segment("d1").unwrap();
        let seg_ids: Vec<&str> = seg.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(seg_ids, vec!["d1:00000", "d1:00001"]);
    }

    #[test]
    fn test_snapshot_unaffected_by_remove() {
        let index = VectorIndex::new(2);
        index
            .insert_batch("d1", "a.txt", vec![entry("d1", "a.txt", 0, vec![1.0, 0.0])])
            .unwrap();
        let before = index.snapshot();
        assert!(index.remove("d1"));
        assert!(!index.remove("d1"));
        assert_eq!(before.len(), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn test_concurrent_remove_of_unrelated_document() {
        let index = Arc::new(VectorIndex::new(2));
        index
            .insert_batch("keep", "keep.txt", vec![entry("keep", "keep.txt", 0, vec![1.0, 0.0])])
            .unwrap();
        let expected = ids(&index.search(&[1.0, 0.0], 5));

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let doc = format!("tmp-{}-{}", t, i);
                        let entries = (0..3).map(|c| entry(&doc, "tmp.txt", c, vec![0.0, 1.0])).collect();
                        index.insert_batch(&doc, "tmp.txt", entries).unwrap();
                        index.remove(&doc);
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            let snap = index.snapshot();
            for doc in snap.segments.values() {
                if doc.document_id.starts_with("tmp-") {
                    assert_eq!(doc.entries.len(), 3, "partial segment observed");
                }
            }
            let hits = snap.search(&[1.0, 0.0], 1);
            assert_eq!(ids(&hits), expected);
        }

        for w in writers {
            w.join().unwrap();
        }
    }
}
