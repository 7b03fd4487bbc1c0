//! The bounded tool suite — contract enforcement over a retrieval backend.
//!
//! Limits enforced here, not in backends, so every backend gets them:
//! - queries trimmed and capped at 500 chars
//! - at most 5 search results per call
//! - snippets capped at 200 chars
//! - opened chunk text capped at 1500 chars before it can reach a prompt

use std::sync::Arc;
use tracing::{info, warn};

use docuagent_core::error::ToolError;
use docuagent_core::retrieval::{OpenedChunk, Retriever, SearchHit};
use docuagent_core::Principal;

/// Maximum query length accepted by `search_docs`.
pub const MAX_QUERY_LENGTH: usize = 500;
/// Maximum results returned per search.
pub const MAX_SEARCH_RESULTS: usize = 5;
/// Maximum snippet length in a search result.
pub const SNIPPET_LENGTH: usize = 200;
/// Maximum opened-citation text length fed to any prompt.
pub const MAX_CITATION_TEXT: usize = 1500;

/// Output of one `search_docs` invocation.
#[derive(Debug, Clone)]
pub struct SearchOutput {
    pub results: Vec<SearchHit>,
}

impl SearchOutput {
    /// Brief summary for the execution trace.
    pub fn summary(&self) -> String {
        if self.results.is_empty() {
            "No results found".into()
        } else {
            format!("Found {} relevant chunks", self.results.len())
        }
    }
}

/// Output of one `open_citation` invocation.
#[derive(Debug, Clone)]
pub struct OpenOutput {
    pub chunk: OpenedChunk,
}

impl OpenOutput {
    /// Brief summary for the execution trace.
    pub fn summary(&self) -> String {
        let len = self.chunk.text.len();
        if len >= 1000 {
            format!("Retrieved {:.1}KB from {}", len as f64 / 1000.0, self.chunk.filename)
        } else {
            format!("Retrieved {len} chars from {}", self.chunk.filename)
        }
    }
}

/// The two bounded tools, adapted over a [`Retriever`].
#[derive(Clone)]
pub struct ToolSuite {
    retriever: Arc<dyn Retriever>,
}

impl ToolSuite {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    /// `search_docs` — search the principal's documents.
    ///
    /// The query is trimmed and capped; results are capped in count and
    /// snippet length.
    pub async fn search_docs(
        &self,
        principal: &Principal,
        query: &str,
    ) -> Result<SearchOutput, ToolError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("Query cannot be empty".into()));
        }

        let query = if query.chars().count() > MAX_QUERY_LENGTH {
            warn!(
                from = query.chars().count(),
                to = MAX_QUERY_LENGTH,
                "search_docs query truncated"
            );
            truncate_chars(query, MAX_QUERY_LENGTH)
        } else {
            query
        };

        let mut results = self
            .retriever
            .search(principal, query, MAX_SEARCH_RESULTS)
            .await?;

        results.truncate(MAX_SEARCH_RESULTS);
        for hit in &mut results {
            if hit.snippet.chars().count() > SNIPPET_LENGTH {
                hit.snippet = truncate_chars(&hit.snippet, SNIPPET_LENGTH).to_string();
            }
        }

        let query_preview: String = query.chars().take(50).collect();
        info!(
            query = %query_preview,
            results = results.len(),
            "search_docs completed"
        );

        Ok(SearchOutput { results })
    }

    /// `open_citation` — read the full text of one chunk.
    ///
    /// Ownership is verified by the backend; the text is capped before it can
    /// be placed in any prompt.
    pub async fn open_citation(
        &self,
        principal: &Principal,
        doc_id: &str,
        chunk_id: &str,
    ) -> Result<OpenOutput, ToolError> {
        let doc_id = doc_id.trim();
        let chunk_id = chunk_id.trim();
        if doc_id.is_empty() {
            return Err(ToolError::InvalidArguments("docId is required".into()));
        }
        if chunk_id.is_empty() {
            return Err(ToolError::InvalidArguments("chunkId is required".into()));
        }

        let mut chunk = self.retriever.open(principal, doc_id, chunk_id).await?;

        if chunk.text.chars().count() > MAX_CITATION_TEXT {
            let capped = truncate_chars(&chunk.text, MAX_CITATION_TEXT).to_string();
            chunk.text = format!("{capped}\n\n[...text truncated...]");
        }

        info!(
            chunk_id = %chunk_id,
            chars = chunk.text.len(),
            "open_citation completed"
        );

        Ok(OpenOutput { chunk })
    }
}

/// Truncate to at most `max` characters. All tool limits count characters,
/// not bytes, so multi-byte text gets the same budget as ASCII.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
