//! # Casefile
//!
//! Evidence-grounded question answering for cold case files.
//!
//! Casefile ingests evidence documents (plain text and PDF), chunks and
//! embeds them into an in-memory vector index, and answers questions in a
//! detective persona using only the retrieved passages, citing the files
//! each answer came from. When the evidence does not cover a question, it
//! says so instead of guessing.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ Chunker ──▶ Embedding ──▶ ┌──────────────┐
//!                                                  │ Vector Index │
//! question ──▶ Embedding ──▶ Retriever ◀────────── └──────────────┘
//!                               │
//!                               ▼
//!                     Prompt Assembler ──▶ Generation ──▶ Citation Extractor
//!                                                               │
//!                                                     answer + sources
//! ```
//!
//! The pipeline stages live in `casefile-core`, which has no runtime,
//! filesystem, or network dependencies. This crate adds the service
//! clients, ingestion coordination, configuration, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`embedding`] | Embedding service clients |
//! | [`generation`] | Generation service clients |
//! | [`extract`] | Evidence text extraction |
//! | [`coordinator`] | Ingestion state machine and index writes |
//! | [`engine`] | Query/ingest/remove/list/read operations |

pub mod config;
pub mod coordinator;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
mod http;
pub mod logging;

pub use casefile_core::EngineError;
pub use engine::{Engine, QueryAnswer};
