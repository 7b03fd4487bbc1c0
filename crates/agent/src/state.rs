//! Request-scoped agent state.
//!
//! One [`AgentState`] exists per run, owned exclusively by the loop that
//! created it and discarded when the run ends. It records every search
//! issued, every citation opened, tool budget consumed, notes from failed
//! tool calls, and detected information gaps.

use serde::{Deserialize, Serialize};

use docuagent_core::{OpenedChunk, SearchHit};

use crate::constraints::PromptConstraints;
use crate::limits::{CITATION_WINDOW, MAX_TOOL_CALLS};

/// Snippets stored from search results are capped; full text only enters
/// state through `open_citation`.
const SEARCH_SNIPPET_CAP: usize = 250;

/// A search hit recorded in state, tagged with the query that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub snippet: String,
    pub score: f32,
    pub filename: String,
    pub query: String,
}

/// A citation opened during the run, numbered in open order. Numbers are
/// stable for the whole run so inline `[n]` markers stay meaningful.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedCitation {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub filename: String,
    pub citation_num: usize,
}

/// A structured record of information that could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Insufficiency {
    pub section: String,
    pub missing: String,
    pub queries_tried: Vec<String>,
}

/// Mutable per-request state. Created with all counters zero, mutated only
/// by the loop controller, never shared across requests.
#[derive(Debug)]
pub struct AgentState {
    pub constraints: PromptConstraints,
    pub tool_calls_used: usize,
    pub iteration: usize,
    pub reprompt_count: usize,
    pub search_queries: Vec<String>,
    pub search_results: Vec<SearchResultItem>,
    pub opened_citations: Vec<OpenedCitation>,
    pub notes: Vec<String>,
    pub insufficiencies: Vec<Insufficiency>,
}

/// Read-only view handed to the validator.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub search_count: usize,
    pub search_queries: Vec<String>,
    pub open_citation_count: usize,
    pub opened_citation_texts: Vec<String>,
    pub search_snippets: Vec<String>,
}

impl AgentState {
    pub fn new(constraints: PromptConstraints) -> Self {
        Self {
            constraints,
            tool_calls_used: 0,
            iteration: 0,
            reprompt_count: 0,
            search_queries: Vec::new(),
            search_results: Vec::new(),
            opened_citations: Vec::new(),
            notes: Vec::new(),
            insufficiencies: Vec::new(),
        }
    }

    pub fn remaining_tool_budget(&self) -> usize {
        MAX_TOOL_CALLS.saturating_sub(self.tool_calls_used)
    }

    pub fn search_count(&self) -> usize {
        self.search_queries.len()
    }

    pub fn record_search(&mut self, query: &str, hits: &[SearchHit]) {
        self.search_queries.push(query.to_string());
        for hit in hits {
            let mut snippet = hit.snippet.clone();
            if snippet.len() > SEARCH_SNIPPET_CAP {
                let cut = (0..=SEARCH_SNIPPET_CAP)
                    .rev()
                    .find(|&i| snippet.is_char_boundary(i))
                    .unwrap_or(0);
                snippet.truncate(cut);
            }
            self.search_results.push(SearchResultItem {
                doc_id: hit.doc_id.clone(),
                chunk_id: hit.chunk_id.clone(),
                chunk_index: hit.chunk_index,
                snippet,
                score: hit.score,
                filename: hit.filename.clone(),
                query: query.to_string(),
            });
        }
    }

    pub fn record_opened(&mut self, chunk: OpenedChunk) {
        let citation_num = self.opened_citations.len() + 1;
        self.opened_citations.push(OpenedCitation {
            doc_id: chunk.doc_id,
            chunk_id: chunk.chunk_id,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            filename: chunk.filename,
            citation_num,
        });
    }

    pub fn record_insufficiency(&mut self, section: impl Into<String>, missing: impl Into<String>) {
        self.insufficiencies.push(Insufficiency {
            section: section.into(),
            missing: missing.into(),
            queries_tried: self.search_queries.clone(),
        });
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            search_count: self.search_queries.len(),
            search_queries: self.search_queries.clone(),
            open_citation_count: self.opened_citations.len(),
            opened_citation_texts: self
                .opened_citations
                .iter()
                .map(|c| c.text.clone())
                .collect(),
            search_snippets: self.search_results.iter().map(|r| r.snippet.clone()).collect(),
        }
    }

    /// The most recently opened citations, bounded by the prompt window.
    /// Older citations stay in state and remain valid grounding candidates.
    pub fn windowed_citations(&self) -> &[OpenedCitation] {
        let start = self.opened_citations.len().saturating_sub(CITATION_WINDOW);
        &self.opened_citations[start..]
    }

    /// Context block for the iteration prompt: search results grouped by
    /// query with full ids, then the windowed citations with full text.
    pub fn build_context(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !self.search_results.is_empty() {
            parts.push("=== SEARCH RESULTS ===".to_string());
            let mut seen_query: Option<&str> = None;
            for r in &self.search_results {
                if seen_query != Some(r.query.as_str()) {
                    parts.push(format!("\nQuery: \"{}\"", r.query));
                    seen_query = Some(r.query.as_str());
                }
                // Full ids shown so the model can pass them to open_citation.
                parts.push(format!(
                    "  - {}: \"{}\"\n    docId={}\n    chunkId={}",
                    r.filename,
                    r.snippet.chars().take(100).collect::<String>(),
                    r.doc_id,
                    r.chunk_id
                ));
            }
        }

        let windowed = self.windowed_citations();
        if !windowed.is_empty() {
            parts.push("\n=== OPENED CITATIONS (Full Text) ===".to_string());
            for c in windowed {
                parts.push(format!(
                    "\n[{}] {} (chunk {}):\n{}",
                    c.citation_num, c.filename, c.chunk_index, c.text
                ));
            }
        }

        if !self.notes.is_empty() {
            parts.push("\n=== NOTES ===".to_string());
            for note in self.notes.iter().rev().take(3).rev() {
                parts.push(format!("- {note}"));
            }
        }

        if parts.is_empty() {
            "(No information gathered yet)".to_string()
        } else {
            parts.join("\n")
        }
    }

    /// Citation roster for the `final` action, listing every opened citation
    /// with its stable number.
    pub fn build_citation_roster(&self) -> String {
        if self.opened_citations.is_empty() {
            return "(No citations opened yet)".to_string();
        }
        self.opened_citations
            .iter()
            .map(|c| {
                format!(
                    "[{}] docId={}, chunkId={}, chunkIndex={}, file={}",
                    c.citation_num, c.doc_id, c.chunk_id, c.chunk_index, c.filename
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
