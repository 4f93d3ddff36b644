//! # casefile core
//!
//! Runtime-agnostic logic for evidence-grounded question answering:
//! data models, chunking, the embedding trait, the vector index,
//! retrieval, grounded prompt assembly, the generation trait, and
//! citation recovery.
//!
//! This crate contains no tokio, filesystem, or HTTP code. The `casefile`
//! app crate supplies concrete service clients and the ingestion
//! coordinator.
//!
//! ## Query path
//!
//! ```text
//! question ─▶ embed ─▶ VectorIndex::search ─▶ retrieve ─▶ assemble ─▶ generate ─▶ extract_citations
//! ```

pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;

pub use error::EngineError;
