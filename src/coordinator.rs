//! Ingestion coordinator.
//!
//! Owns the document records and is the only writer of the shared
//! [`VectorIndex`]. Each ingestion walks the per-document state machine
//! `Pending → Chunked → Embedded → Indexed` (or `Failed`) and publishes a
//! document's entries as one atomic batch, so a concurrent query sees
//! either the previous version of a document or the new one.
//!
//! Ingestions for the same filename are serialized; different filenames
//! proceed in parallel. No index lock is held while the embedding service
//! is called. Every ingestion runs in its own task: dropping the caller's
//! future does not stop it half-way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use casefile_core::chunk::build_chunks;
use casefile_core::embedding::{embed_batched, EmbeddingProvider};
use casefile_core::index::VectorIndex;
use casefile_core::models::{Chunk, Document, IndexEntry, IngestState};
use casefile_core::EngineError;

use crate::extract::extract_evidence;

/// Chunking and batching parameters for ingestion.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    pub batch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: 500,
            overlap_chars: 50,
            batch_size: 32,
        }
    }
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Name the evidence is filed under (`.pdf` uploads become `.txt`).
    pub filename: String,
    pub document_id: String,
    pub state: IngestState,
    pub chunks: usize,
    /// Chunks whose stored embedding was reused because their text is unchanged.
    pub embeddings_reused: usize,
}

/// Last known ingestion state for a filename.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub state: IngestState,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

struct StoredDocument {
    document: Arc<Document>,
    chunks: Vec<Arc<Chunk>>,
}

struct Inner {
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: IngestSettings,
    documents: RwLock<HashMap<String, StoredDocument>>,
    statuses: RwLock<HashMap<String, IngestStatus>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Cheap to clone; clones share the same documents and index.
#[derive(Clone)]
pub struct IngestionCoordinator {
    inner: Arc<Inner>,
}

impl IngestionCoordinator {
    pub fn new(
        index: Arc<VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                index,
                provider,
                settings,
                documents: RwLock::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.inner.index
    }

    /// Validate, extract, chunk, embed and index an upload.
    ///
    /// The file type is checked before any state is created, so an
    /// unsupported upload leaves no trace. Uploading a filename that is
    /// already indexed replaces it; if the replacement fails the previous
    /// version stays searchable.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestReport, EngineError> {
        let evidence = extract_evidence(filename, bytes)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(evidence.filename, evidence.text).await })
            .await
            .map_err(|e| EngineError::IndexInconsistency(format!("ingestion task failed: {}", e)))?
    }

    /// Remove a document: its index entries first, then its record.
    ///
    /// The filename's status and lock are released as well, including
    /// the `Failed` status of an upload that never got indexed.
    pub async fn remove(&self, filename: &str) -> Result<(), EngineError> {
        let lock = self.inner.lock_for(filename);
        let guard = lock.lock().await;

        let document_id = self
            .inner
            .read_documents()
            .get(filename)
            .map(|d| d.document.id.clone());

        if let Some(document_id) = &document_id {
            self.inner.index.remove(document_id);
            self.inner.write_documents().remove(filename);
        }
        self.inner
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(filename);

        drop(guard);
        self.inner.release_lock(filename, lock);

        let document_id =
            document_id.ok_or_else(|| EngineError::DocumentNotFound(filename.to_string()))?;
        info!(filename, document_id = %document_id, "removed evidence");
        Ok(())
    }

    /// Filenames with an indexed document, sorted.
    pub fn list_indexed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read_documents().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn document(&self, filename: &str) -> Option<Arc<Document>> {
        self.inner
            .read_documents()
            .get(filename)
            .map(|d| Arc::clone(&d.document))
    }

    pub fn chunks(&self, filename: &str) -> Vec<Arc<Chunk>> {
        self.inner
            .read_documents()
            .get(filename)
            .map(|d| d.chunks.clone())
            .unwrap_or_default()
    }

    pub fn status(&self, filename: &str) -> Option<IngestStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned()
    }
}

impl Inner {
    async fn run(&self, filename: String, text: String) -> Result<IngestReport, EngineError> {
        let lock = self.lock_for(&filename);
        let _guard = lock.lock().await;

        let previous = self
            .read_documents()
            .get(&filename)
            .map(|d| (d.document.id.clone(), d.chunks.clone()));
        let document_id = previous
            .as_ref()
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let previous_chunks = previous.map(|(_, c)| c).unwrap_or_default();

        let mut state = IngestState::Pending;
        self.set_status(&filename, state, None);

        match self
            .pipeline(&filename, &document_id, &text, &previous_chunks, &mut state)
            .await
        {
            Ok(report) => Ok(report),
            Err(e) => {
                let failed = state.advance(IngestState::Failed).unwrap_or(IngestState::Failed);
                self.set_status(&filename, failed, Some(e.to_string()));
                warn!(filename = %filename, document_id = %document_id, error = %e, "ingestion failed");
                Err(e)
            }
        }
    }

    async fn pipeline(
        &self,
        filename: &str,
        document_id: &str,
        text: &str,
        previous_chunks: &[Arc<Chunk>],
        state: &mut IngestState,
    ) -> Result<IngestReport, EngineError> {
        let settings = self.settings;
        let mut chunks = build_chunks(
            document_id,
            text,
            settings.max_chunk_chars,
            settings.overlap_chars,
        );
        *state = state.advance(IngestState::Chunked)?;
        self.set_status(filename, *state, None);
        debug!(filename, chunks = chunks.len(), "chunked");

        let reused = self.embed_chunks(&mut chunks, previous_chunks).await?;
        *state = state.advance(IngestState::Embedded)?;
        self.set_status(filename, *state, None);

        let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Arc::new).collect();
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = chunk.embedding.clone().ok_or_else(|| {
                EngineError::IndexInconsistency(format!("chunk {} has no embedding", chunk.id))
            })?;
            entries.push(IndexEntry {
                id: chunk.id.clone(),
                document_id: document_id.to_string(),
                filename: filename.to_string(),
                chunk: Arc::clone(chunk),
                vector,
            });
        }

        let document = Arc::new(Document {
            id: document_id.to_string(),
            filename: filename.to_string(),
            raw_text: text.to_string(),
            ingested_at: Utc::now(),
        });

        self.index.insert_batch(document_id, filename, entries)?;
        let count = chunks.len();
        self.write_documents()
            .insert(filename.to_string(), StoredDocument { document, chunks });
        *state = state.advance(IngestState::Indexed)?;
        self.set_status(filename, *state, None);

        info!(
            filename,
            document_id,
            chunks = count,
            embeddings_reused = reused,
            "indexed evidence"
        );

        Ok(IngestReport {
            filename: filename.to_string(),
            document_id: document_id.to_string(),
            state: *state,
            chunks: count,
            embeddings_reused: reused,
        })
    }

    /// Fill in every chunk's embedding, reusing vectors from the previous
    /// version of the document where the text hash is unchanged. Returns
    /// the number reused.
    async fn embed_chunks(
        &self,
        chunks: &mut [Chunk],
        previous: &[Arc<Chunk>],
    ) -> Result<usize, EngineError> {
        let dims = self.provider.dims();
        let known: HashMap<&str, &Vec<f32>> = previous
            .iter()
            .filter_map(|c| c.embedding.as_ref().map(|v| (c.hash.as_str(), v)))
            .filter(|(_, v)| v.len() == dims)
            .collect();

        let mut reused = 0;
        let mut missing = Vec::new();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            match known.get(chunk.hash.as_str()) {
                Some(v) => {
                    chunk.embedding = Some((*v).clone());
                    reused += 1;
                }
                None => missing.push(i),
            }
        }

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors =
                embed_batched(self.provider.as_ref(), &texts, self.settings.batch_size).await?;
            for (i, v) in missing.into_iter().zip(vectors) {
                chunks[i].embedding = Some(v);
            }
        }

        Ok(reused)
    }

    fn lock_for(&self, filename: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(filename.to_string()).or_default())
    }

    /// Forget the filename's lock unless another task is waiting on it.
    fn release_lock(&self, filename: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(filename);
        }
    }

    fn set_status(&self, filename: &str, state: IngestState, reason: Option<String>) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                filename.to_string(),
                IngestStatus {
                    state,
                    reason,
                    updated_at: Utc::now(),
                },
            );
    }

    fn read_documents(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredDocument>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_documents(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredDocument>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }
}
