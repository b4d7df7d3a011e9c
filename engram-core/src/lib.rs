#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::module_name_repetitions)]

//! Engram: a local, daemon-resident episodic memory system.
//!
//! Engram tails append-only conversation transcripts, mines them for durable
//! "episodes" with an external LLM, indexes episodes and memory-file "chunks"
//! for hybrid BM25 + vector retrieval, and serves pre-computed per-session
//! "recollections" to a host assistant over a Unix domain socket.
//!
//! ## Module map
//!
//! - [`types`]: the data model shared by every component.
//! - [`error`]: the crate's error kinds and recoverability classification.
//! - [`store`]: SQLite(libsql)-backed storage, migrations, FTS5.
//! - [`embeddings`]: the `EmbeddingProvider` contract and its implementations.
//! - [`llm`]: the extraction `Llm` contract and its implementations.
//! - [`coordination`]: `FileLock`, `StateStore`, `PidGuard`, `UdsServer`.
//! - [`retrieval`]: the hybrid search `Retriever`.
//! - [`recollect`]: per-session pre-computed `Recollector`.
//! - [`extract`]: the LLM-driven `Extractor`.
//! - [`consolidate`]: the `Consolidator` graduation/compression pass.
//! - [`tailer`]: the incremental JSONL `SessionTailer`.
//! - [`daemon`]: the `Daemon` orchestrator.

pub mod constants;
pub mod coordination;
pub mod daemon;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod consolidate;
pub mod llm;
pub mod recollect;
pub mod retrieval;
pub mod store;
pub mod tailer;
pub mod types;

pub use error::{EngramError, Result};
