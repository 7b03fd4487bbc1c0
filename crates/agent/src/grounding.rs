//! Citation grounding.
//!
//! The last stage before a result leaves the executor. Every inline `[k]`
//! marker in the accepted answer is resolved against citations actually
//! opened (or, when nothing was opened, search results actually returned)
//! during this run. Markers with no real counterpart are removed, the
//! survivors renumbered contiguously, and the output citation list contains
//! only entries traceable to a tool invocation. Nothing the generator
//! invented can survive this pass.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::action::CitationRef;
use crate::state::AgentState;

/// Snippet length for grounded citations returned to the caller.
const GROUNDED_SNIPPET_LEN: usize = 200;

/// The only citation shape ever returned externally.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundedCitation {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub snippet: String,
    pub filename: String,
}

/// One verifiable candidate a marker may resolve to.
struct Candidate {
    doc_id: String,
    chunk_id: String,
    chunk_index: usize,
    snippet: String,
    filename: String,
}

impl Candidate {
    fn to_grounded(&self) -> GroundedCitation {
        GroundedCitation {
            doc_id: self.doc_id.clone(),
            chunk_id: self.chunk_id.clone(),
            chunk_index: self.chunk_index,
            snippet: self.snippet.clone(),
            filename: self.filename.clone(),
        }
    }
}

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern"));
static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("space run pattern"));

fn head(text: &str, len: usize) -> String {
    if text.len() <= len {
        return text.to_string();
    }
    let cut = (0..=len).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    text[..cut].to_string()
}

/// Real marker candidates: opened citations first, search results only as a
/// fallback when nothing was opened.
fn candidates(state: &AgentState) -> Vec<Candidate> {
    if !state.opened_citations.is_empty() {
        state
            .opened_citations
            .iter()
            .map(|c| Candidate {
                doc_id: c.doc_id.clone(),
                chunk_id: c.chunk_id.clone(),
                chunk_index: c.chunk_index,
                snippet: head(&c.text, GROUNDED_SNIPPET_LEN),
                filename: c.filename.clone(),
            })
            .collect()
    } else {
        state
            .search_results
            .iter()
            .map(|r| Candidate {
                doc_id: r.doc_id.clone(),
                chunk_id: r.chunk_id.clone(),
                chunk_index: r.chunk_index,
                snippet: r.snippet.clone(),
                filename: r.filename.clone(),
            })
            .collect()
    }
}

/// Collapse runs of spaces and tabs left behind by stripped markers. Line
/// structure is preserved.
fn tidy(answer: &str) -> String {
    let collapsed = SPACE_RUN.replace_all(answer, " ");
    collapsed
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Ground an accepted answer against the run's state.
///
/// Returns the cleaned answer (hallucinated markers removed, survivors
/// renumbered contiguously in order of first appearance) and the grounded
/// citation list, ordered by new marker number followed by any explicitly
/// declared citations that were verified but never referenced inline.
pub fn ground(
    answer: &str,
    used_citations: &[CitationRef],
    state: &AgentState,
) -> (String, Vec<GroundedCitation>) {
    let candidates = candidates(state);

    // Renumber in-range markers by first appearance; drop the rest.
    let mut renumbering: HashMap<usize, usize> = HashMap::new();
    let mut referenced: Vec<usize> = Vec::new();
    let mut stripped = 0usize;
    let cleaned = MARKER.replace_all(answer, |caps: &regex::Captures<'_>| {
        let k: usize = match caps[1].parse() {
            Ok(k) => k,
            Err(_) => {
                stripped += 1;
                return String::new();
            }
        };
        if k >= 1 && k <= candidates.len() {
            let next = renumbering.len() + 1;
            let new = *renumbering.entry(k).or_insert(next);
            if !referenced.contains(&(k - 1)) {
                referenced.push(k - 1);
            }
            format!("[{new}]")
        } else {
            stripped += 1;
            String::new()
        }
    });

    let mut grounded: Vec<GroundedCitation> = referenced
        .iter()
        .map(|&idx| candidates[idx].to_grounded())
        .collect();

    // Explicitly declared citations count too, if they match something real.
    for cite in used_citations {
        let known = candidates
            .iter()
            .find(|c| c.doc_id == cite.doc_id && c.chunk_id == cite.chunk_id);
        if let Some(c) = known {
            if !grounded
                .iter()
                .any(|g| g.doc_id == c.doc_id && g.chunk_id == c.chunk_id)
            {
                grounded.push(c.to_grounded());
            }
        }
    }

    if stripped > 0 {
        tracing::debug!(stripped, "removed unverifiable citation markers");
    }

    (tidy(&cleaned), grounded)
}

/// Every opened citation as a grounded citation, in open order. Used on the
/// forced-synthesis path, where the whole opened set backs the answer.
pub fn all_opened(state: &AgentState) -> Vec<GroundedCitation> {
    state
        .opened_citations
        .iter()
        .map(|c| GroundedCitation {
            doc_id: c.doc_id.clone(),
            chunk_id: c.chunk_id.clone(),
            chunk_index: c.chunk_index,
            snippet: head(&c.text, GROUNDED_SNIPPET_LEN),
            filename: c.filename.clone(),
        })
        .collect()
}

/// Last-resort citations from search results, used when an answer was
/// produced but nothing could be grounded from markers.
pub fn fallback_from_search(state: &AgentState) -> Vec<GroundedCitation> {
    state
        .search_results
        .iter()
        .take(3)
        .map(|r| GroundedCitation {
            doc_id: r.doc_id.clone(),
            chunk_id: r.chunk_id.clone(),
            chunk_index: r.chunk_index,
            snippet: r.snippet.clone(),
            filename: r.filename.clone(),
        })
        .collect()
}
