//! The evidence engine: the operations a transport layer drives.
//!
//! [`Engine`] wires the retrieval pipeline (embed → search → assemble →
//! generate → cite) to the [`IngestionCoordinator`]. It holds no state
//! beyond the coordinator's documents and the shared vector index; the
//! caller owns conversation history and decides what to persist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use casefile_core::citation::{CitationExtractor, FallbackMatcher};
use casefile_core::embedding::EmbeddingProvider;
use casefile_core::generation::Generator;
use casefile_core::index::VectorIndex;
use casefile_core::models::{ConversationTurn, SourceRef};
use casefile_core::prompt::{assemble, Persona, PromptBudget};
use casefile_core::retrieve::{retrieve, RetrievalParams};
use casefile_core::EngineError;

use crate::config::Config;
use crate::coordinator::{IngestReport, IngestSettings, IngestStatus, IngestionCoordinator};
use crate::embedding::create_provider;
use crate::extract::FileKind;
use crate::generation::create_generator;

/// An answer and the evidence it was attributed to.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Whether any passage was put in front of the generator.
    pub evidence_found: bool,
}

/// A suggested line of questioning.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Tip {
    pub text: &'static str,
    pub query: &'static str,
}

pub const INVESTIGATION_TIPS: &[Tip] = &[
    Tip {
        text: "Ask about specific suspects",
        query: "Who are the main suspects in this case and what are their motives?",
    },
    Tip {
        text: "Query timeline of events",
        query: "What is the complete timeline of events on the night of the crime?",
    },
    Tip {
        text: "Look for connections",
        query: "Are there any connections or contradictions between the witness statements?",
    },
    Tip {
        text: "Request evidence summary",
        query: "Give me a complete summary of all physical evidence found at the crime scene.",
    },
    Tip {
        text: "Check financial motives",
        query: "Is there any financial evidence or motive related to this case?",
    },
    Tip {
        text: "Analyze witness credibility",
        query: "How credible are the witness statements? Are there any inconsistencies?",
    },
];

/// Result of loading an evidence folder.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Source path of each indexed file with its report.
    pub indexed: Vec<(PathBuf, IngestReport)>,
    pub failed: Vec<(PathBuf, EngineError)>,
    /// Files skipped because their type is not evidence.
    pub skipped: usize,
}

impl LoadSummary {
    /// Path of the file currently filed under `filename`. When two files
    /// share a name the later one in path order replaced the earlier.
    pub fn source_path(&self, filename: &str) -> Option<&Path> {
        self.indexed
            .iter()
            .rev()
            .find(|(_, report)| report.filename == filename)
            .map(|(path, _)| path.as_path())
    }
}

/// Tunables for the query path.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub retrieval: RetrievalParams,
    pub budget: PromptBudget,
    pub persona: Persona,
    pub min_overlap: f64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalParams::default(),
            budget: PromptBudget::default(),
            persona: Persona::default(),
            min_overlap: 0.5,
        }
    }
}

pub struct Engine {
    coordinator: IngestionCoordinator,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    settings: QuerySettings,
    citations: CitationExtractor,
}

impl Engine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        ingest: IngestSettings,
        settings: QuerySettings,
    ) -> Self {
        let index = Arc::new(VectorIndex::new(embedder.dims()));
        let coordinator = IngestionCoordinator::new(index, Arc::clone(&embedder), ingest);
        let citations = CitationExtractor::new(
            Box::new(FallbackMatcher::standard(settings.min_overlap)),
            settings.persona.no_evidence_reply.clone(),
        );
        Self {
            coordinator,
            embedder,
            generator,
            settings,
            citations,
        }
    }

    /// Build an engine with the service clients named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        info!(
            embedding = embedder.model_name(),
            dims = embedder.dims(),
            generation = generator.model_name(),
            "engine ready"
        );
        Ok(Self::new(
            embedder,
            generator,
            IngestSettings {
                max_chunk_chars: config.chunking.max_chars,
                overlap_chars: config.chunking.overlap_chars,
                batch_size: config.embedding.batch_size,
            },
            QuerySettings {
                retrieval: config.retrieval.params(),
                budget: config.prompt.budget(),
                persona: config.prompt.persona(),
                min_overlap: config.citation.min_overlap,
            },
        ))
    }

    /// Answer `question` from the indexed evidence.
    ///
    /// With no relevant evidence the answer is the persona's no-evidence
    /// reply and `sources` is empty. Nothing is mutated, so abandoning the
    /// returned future at any point is safe.
    pub async fn query(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryAnswer, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::EmptyQuestion);
        }

        let index = self.coordinator.index();
        let passages = retrieve(
            self.embedder.as_ref(),
            index,
            question,
            &self.settings.retrieval,
        )
        .await?;

        let request = assemble(
            question,
            &passages,
            &self.settings.persona,
            history,
            &self.settings.budget,
        );
        let raw = self.generator.generate(&request).await?;
        let citations = self.citations.extract(&raw, &request.passages);

        debug!(
            retrieved = passages.len(),
            supplied = request.passages.len(),
            cited = citations.cited_sources.len(),
            "answered question"
        );

        Ok(QueryAnswer {
            answer: citations.cleaned_answer,
            sources: citations.cited_sources,
            evidence_found: !request.evidence_absent,
        })
    }

    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestReport, EngineError> {
        self.coordinator.ingest(filename, bytes).await
    }

    pub async fn remove(&self, filename: &str) -> Result<(), EngineError> {
        self.coordinator.remove(filename).await
    }

    pub fn list_indexed(&self) -> Vec<String> {
        self.coordinator.list_indexed()
    }

    /// The full text of an indexed evidence file.
    pub fn read_evidence(&self, filename: &str) -> Result<String, EngineError> {
        self.coordinator
            .document(filename)
            .map(|d| d.raw_text.clone())
            .ok_or_else(|| EngineError::DocumentNotFound(filename.to_string()))
    }

    pub fn status(&self, filename: &str) -> Option<IngestStatus> {
        self.coordinator.status(filename)
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.coordinator
    }

    pub fn tips(&self) -> &'static [Tip] {
        INVESTIGATION_TIPS
    }

    /// Ingest every supported file under `dir`, in path order.
    ///
    /// A missing folder is created empty. Files of other types are
    /// skipped; per-file failures are collected rather than aborting the
    /// load.
    pub async fn load_evidence_dir(&self, dir: &Path) -> Result<LoadSummary> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create evidence folder: {}", dir.display()))?;
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        // Sort for deterministic ordering
        paths.sort();

        let mut summary = LoadSummary::default();
        for path in paths {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => {
                    summary.skipped += 1;
                    continue;
                }
            };
            if FileKind::from_filename(&name).is_err() {
                debug!(path = %path.display(), "skipping non-evidence file");
                summary.skipped += 1;
                continue;
            }

            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match self.ingest(&name, &bytes).await {
                Ok(report) => summary.indexed.push((path, report)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not index evidence file");
                    summary.failed.push((path, e));
                }
            }
        }

        info!(
            dir = %dir.display(),
            indexed = summary.indexed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped,
            "loaded evidence folder"
        );
        Ok(summary)
    }
}
