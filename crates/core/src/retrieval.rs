//! Retriever trait — the abstraction over the document-retrieval backend.
//!
//! Both agent tools (`search_docs`, `open_citation`) are thin adapters over
//! this trait. Scoring, indexing, and ownership enforcement all live behind
//! it; the executor only consumes results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::principal::Principal;

/// A single hit from a document search.
///
/// Carries a snippet and score only — never full chunk text. The agent must
/// call `open_citation` to read a chunk before citing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub snippet: String,
    pub score: f32,
    /// Filename of the owning document, for display and traces.
    pub filename: String,
}

/// The full text of one opened chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedChunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub filename: String,
}

/// The retrieval capability consumed by the tool suite.
///
/// Implementations must scope all access to the given principal: a search
/// never returns another user's documents, and `open` returns
/// `ToolError::Forbidden` for chunks the principal does not own.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Search the principal's documents, returning at most `limit` hits
    /// ordered by descending relevance.
    async fn search(
        &self,
        principal: &Principal,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SearchHit>, ToolError>;

    /// Fetch the full text of one chunk, after verifying ownership.
    async fn open(
        &self,
        principal: &Principal,
        doc_id: &str,
        chunk_id: &str,
    ) -> std::result::Result<OpenedChunk, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hit_wire_format_is_camel_case() {
        let hit = SearchHit {
            doc_id: "d1".into(),
            chunk_id: "c1".into(),
            chunk_index: 0,
            snippet: "text".into(),
            score: 0.9,
            filename: "a.md".into(),
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert!(json.contains(r#""docId":"d1""#));
        assert!(json.contains(r#""chunkId":"c1""#));
        assert!(json.contains(r#""chunkIndex":0"#));
    }
}
