//! In-memory retrieval backend.
//!
//! Deterministic term-overlap scoring over a fixed set of chunks. Used by
//! tests, gateway smoke tests, and the CLI demo corpus. Ownership scoping is
//! enforced the same way a real backend would: searches only see the
//! principal's own chunks, and opening a foreign chunk is `Forbidden`.

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use docuagent_core::error::ToolError;
use docuagent_core::retrieval::{OpenedChunk, Retriever, SearchHit};
use docuagent_core::Principal;

/// One chunk held by the in-memory backend.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub owner: Principal,
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub filename: String,
    pub text: String,
}

/// A retriever over a fixed chunk list.
pub struct InMemoryRetriever {
    chunks: Vec<StoredChunk>,
}

impl InMemoryRetriever {
    pub fn new(chunks: Vec<StoredChunk>) -> Self {
        Self { chunks }
    }

    /// Build a small corpus of operations documentation owned by `principal`.
    pub fn with_demo_corpus(principal: &Principal) -> Self {
        let docs: &[(&str, &str)] = &[
            (
                "retry-policy.md",
                "Retry Policy\n\nAll ingestion workers retry failed jobs with exponential \
                 backoff: 2s initial delay, doubling up to 60s, maximum 5 attempts. \
                 Jobs that exhaust retries land in the dead-letter queue.",
            ),
            (
                "database-operations.md",
                "Database Operations\n\nTo rebuild the orders index run:\n```sql\nREINDEX TABLE \
                 public.orders;\n```\nVerify deletes with:\n```sql\nSELECT COUNT(*) FROM orders \
                 WHERE deleted_at IS NOT NULL;\n```",
            ),
            (
                "sso-configuration.md",
                "SSO Configuration\n\nThe identity provider must allow the exact redirect URI:\n\
                 Redirect URI: https://app.example.com/callback\n\nRotate client secrets \
                 quarterly. The newest-dated note in this folder wins on conflicts.",
            ),
            (
                "rate-limits.md",
                "Rate Limits\n\nThe ask endpoint allows 10 requests per minute per user. \
                 Upload endpoints allow 5 concurrent uploads. Exceeding either returns 429.",
            ),
        ];

        let chunks = docs
            .iter()
            .map(|(filename, text)| StoredChunk {
                owner: principal.clone(),
                doc_id: Uuid::new_v4().to_string(),
                chunk_id: Uuid::new_v4().to_string(),
                chunk_index: 0,
                filename: (*filename).to_string(),
                text: (*text).to_string(),
            })
            .collect();

        Self::new(chunks)
    }

    fn score(query: &str, text: &str) -> f32 {
        let query_terms: HashSet<String> = tokenize(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms: HashSet<String> = tokenize(text);
        let overlap = query_terms.intersection(&text_terms).count();
        overlap as f32 / query_terms.len() as f32
    }
}

fn tokenize(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn search(
        &self,
        principal: &Principal,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let mut scored: Vec<(f32, &StoredChunk)> = self
            .chunks
            .iter()
            .filter(|c| &c.owner == principal)
            .map(|c| (Self::score(query, &c.text), c))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, c)| SearchHit {
                doc_id: c.doc_id.clone(),
                chunk_id: c.chunk_id.clone(),
                chunk_index: c.chunk_index,
                snippet: c.text.chars().take(200).collect(),
                score,
                filename: c.filename.clone(),
            })
            .collect())
    }

    async fn open(
        &self,
        principal: &Principal,
        doc_id: &str,
        chunk_id: &str,
    ) -> Result<OpenedChunk, ToolError> {
        let chunk = self
            .chunks
            .iter()
            .find(|c| c.chunk_id == chunk_id)
            .ok_or_else(|| ToolError::NotFound(format!("Chunk not found: {chunk_id}")))?;

        if chunk.doc_id != doc_id {
            return Err(ToolError::InvalidArguments(
                "chunkId does not belong to specified docId".into(),
            ));
        }

        if &chunk.owner != principal {
            return Err(ToolError::Forbidden(
                "You do not have access to this document".into(),
            ));
        }

        Ok(OpenedChunk {
            doc_id: chunk.doc_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            filename: chunk.filename.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_is_scoped_to_principal() {
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        let retriever = InMemoryRetriever::with_demo_corpus(&alice);

        let hits = retriever.search(&bob, "backoff retry", 5).await.unwrap();
        assert!(hits.is_empty());

        let hits = retriever.search(&alice, "backoff retry", 5).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn search_orders_by_score() {
        let p = Principal::new("u1");
        let retriever = InMemoryRetriever::with_demo_corpus(&p);
        let hits = retriever.search(&p, "redirect uri callback", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].filename, "sso-configuration.md");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn open_checks_doc_chunk_pairing() {
        let p = Principal::new("u1");
        let retriever = InMemoryRetriever::with_demo_corpus(&p);
        let hits = retriever.search(&p, "rate limits", 5).await.unwrap();
        let hit = &hits[0];

        let err = retriever
            .open(&p, "wrong-doc-id", &hit.chunk_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn open_unknown_chunk_is_not_found() {
        let p = Principal::new("u1");
        let retriever = InMemoryRetriever::with_demo_corpus(&p);
        let err = retriever.open(&p, "d", "missing").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
