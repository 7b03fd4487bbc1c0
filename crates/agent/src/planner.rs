//! Plan generation.
//!
//! One generator call produces a 2–5 step plan for answering the question.
//! Output is parsed permissively (JSON array, numbered list, bullets, bare
//! lines) and any failure, generator or parse, falls back to a fixed default
//! plan. Planning never fails the run.

use std::sync::{Arc, LazyLock};

use docuagent_core::{GenerateRequest, Generator};
use regex::Regex;
use serde::Serialize;

use crate::limits::PLAN_MAX_TOKENS;

pub const MIN_PLAN_STEPS: usize = 2;
pub const MAX_PLAN_STEPS: usize = 5;

const DEFAULT_PLAN: &[&str] = &[
    "Search documents for relevant information",
    "Open the best matching citations",
    "Synthesize answer with citations",
];

const PLAN_SYSTEM_PROMPT: &str = "\
You are a planning assistant for a document Q&A system.

Your task is to create a SHORT, FOCUSED plan to answer the user's question using their uploaded documents.

AVAILABLE TOOLS:
1. search_docs(query) - Search the user's documents for relevant content. Returns top 5 matching chunks.
2. open_citation(docId, chunkId) - Retrieve the full text of a specific chunk for detailed reading.

RULES:
1. Output EXACTLY 2-5 steps. No more, no less.
2. Each step must be ONE clear, actionable instruction.
3. Steps should reference tools by name when a tool is needed.
4. The final step should always be about synthesizing/answering.
5. Be specific about what to search for.
6. Do NOT include introductions, explanations, or commentary.

OUTPUT FORMAT:
Return a JSON array of strings, each string being one step.

Example:
[\"Search for 'quarterly revenue figures'\", \"Open the top 2 citations to read details\", \"Synthesize the answer with specific numbers and citations\"]

Now create a plan for the following question:";

/// An execution plan for a single run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Plan {
    pub steps: Vec<String>,
    /// True when the generator output could not be used and the default
    /// plan was substituted.
    #[serde(skip)]
    pub is_fallback: bool,
}

impl Plan {
    pub fn fallback() -> Self {
        Self {
            steps: DEFAULT_PLAN.iter().map(|s| s.to_string()).collect(),
            is_fallback: true,
        }
    }
}

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("json array pattern"));
static NUMBERED_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[\.\)]\s*(.+)$").expect("numbered pattern"));
static BULLET_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-\*•]\s*(.+)$").expect("bullet pattern"));

/// Extract plan steps from raw generator output.
///
/// Strategies, in order: JSON array, numbered list, bullet list, bare lines
/// that are not meta-commentary. Returns `None` when nothing usable is found.
fn parse_steps(response: &str) -> Option<Vec<String>> {
    let text = response.trim();

    if let Some(m) = JSON_ARRAY.find(text) {
        if let Ok(steps) = serde_json::from_str::<Vec<String>>(m.as_str()) {
            let steps: Vec<String> = steps
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !steps.is_empty() {
                return Some(steps);
            }
        }
    }

    let numbered: Vec<String> = NUMBERED_STEP
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if numbered.len() >= MIN_PLAN_STEPS {
        return Some(numbered);
    }

    let bullets: Vec<String> = BULLET_STEP
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if bullets.len() >= MIN_PLAN_STEPS {
        return Some(bullets);
    }

    const META_PREFIXES: &[&str] = &["here", "plan:", "steps:", "the plan", "i will", "let me"];
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.len() > 10)
        .filter(|line| {
            let lower = line.to_lowercase();
            !META_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
        .map(str::to_string)
        .collect();
    if lines.len() >= MIN_PLAN_STEPS {
        return Some(lines);
    }

    None
}

/// Normalize parsed steps: drop empties, truncate to five steps, reject
/// too-short steps, clip overlong ones.
fn validate_steps(steps: Vec<String>) -> Option<Vec<String>> {
    let mut steps: Vec<String> = steps
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if steps.len() < MIN_PLAN_STEPS {
        return None;
    }
    if steps.len() > MAX_PLAN_STEPS {
        tracing::warn!(from = steps.len(), to = MAX_PLAN_STEPS, "truncating plan");
        steps.truncate(MAX_PLAN_STEPS);
    }
    for step in steps.iter_mut() {
        if step.len() < 5 {
            return None;
        }
        if step.len() > 500 {
            let cut = (0..=500)
                .rev()
                .find(|&i| step.is_char_boundary(i))
                .unwrap_or(0);
            step.truncate(cut);
            step.push_str("...");
        }
    }
    Some(steps)
}

/// Generates plans through a [`Generator`].
#[derive(Clone)]
pub struct Planner {
    generator: Arc<dyn Generator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Produce a plan for the question. Infallible: any failure yields the
    /// default plan flagged as a fallback.
    pub async fn plan(&self, question: &str) -> Plan {
        if question.trim().is_empty() {
            tracing::warn!("empty question, using default plan");
            return Plan::fallback();
        }

        let request = GenerateRequest::new(format!("{PLAN_SYSTEM_PROMPT}\n\nQuestion: {question}"))
            .with_temperature(0.3)
            .with_max_tokens(PLAN_MAX_TOKENS);

        let response = match self.generator.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "plan generation failed, using fallback");
                return Plan::fallback();
            }
        };

        match parse_steps(&response).and_then(validate_steps) {
            Some(steps) => {
                tracing::debug!(steps = steps.len(), "generated plan");
                Plan {
                    steps,
                    is_fallback: false,
                }
            }
            None => {
                let preview: String = response.chars().take(200).collect();
                tracing::warn!(response = %preview, "unparseable plan, using fallback");
                Plan::fallback()
            }
        }
    }
}
