//! Tool implementations for DocuAgent.
//!
//! The agent has exactly two tools:
//!
//! - `search_docs` — search the user's documents, snippets + scores only
//! - `open_citation` — read the full (capped) text of one chunk
//!
//! [`ToolSuite`] is the bounded adapter the executor calls: it enforces the
//! tool contracts (query length, result limits, text caps) over whatever
//! [`Retriever`] backend is plugged in. [`InMemoryRetriever`] is a
//! deterministic backend for tests and the CLI demo corpus.

pub mod in_memory;
pub mod suite;

pub use in_memory::{InMemoryRetriever, StoredChunk};
pub use suite::{OpenOutput, SearchOutput, ToolSuite};

use docuagent_core::Principal;
use std::sync::Arc;

/// Build a tool suite over a small built-in demo corpus.
///
/// Used by the CLI when no retrieval backend is configured, so the agent can
/// be exercised end to end without external services.
pub fn demo_suite(principal: &Principal) -> ToolSuite {
    let retriever = InMemoryRetriever::with_demo_corpus(principal);
    ToolSuite::new(Arc::new(retriever))
}
