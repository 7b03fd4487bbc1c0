//! Prompt assembly for the tool loop.

use crate::constraints::{self, PromptConstraints};
use crate::limits::MAX_TOOL_CALLS;
use crate::state::AgentState;

pub const TOOL_LOOP_SYSTEM_PROMPT: &str = r#"You are an AI assistant executing a plan to answer questions using document search tools.

STRICT OUTPUT FORMAT:
You MUST output EXACTLY ONE valid JSON object per response. No text before or after.

For tool calls:
{
  "type": "tool_call",
  "tool": "search_docs" | "open_citation",
  "input": { ... }
}

For final answer (ONLY when you have gathered enough information):
{
  "type": "final",
  "answer": "Your answer with [1], [2] citation markers",
  "used_citations": [
    {"docId": "...", "chunkId": "...", "chunkIndex": 0}
  ],
  "insufficiencies": [
    {"section": "...", "missing": "...", "queriesTried": ["..."]}
  ]
}

AVAILABLE TOOLS:
1. search_docs - Search documents
   Input: {"query": "search terms"}

2. open_citation - Read full text of a chunk (REQUIRED before citing)
   Input: {"docId": "FULL-ID-HERE", "chunkId": "FULL-ID-HERE"}
   IMPORTANT: You MUST use the COMPLETE id strings shown in search results.
   Do NOT truncate or shorten the ids!

CRITICAL RULES:
1. You MUST call open_citation before you can cite a source in your final answer
2. Use the FULL docId and chunkId from search results - do not truncate!
3. Citation numbers [1], [2] must match opened citations
4. Do NOT include information not found in opened citations
5. If information is missing, include it in "insufficiencies"
6. Say "I don't know based on the provided documents" if nothing relevant found
7. NEVER invent tools, commands, or procedures not in the documents"#;

pub const SYNTHESIS_PROMPT: &str = r#"Based on the gathered information, answer the question.

STRICT RULES:
1. Use ONLY the provided context - never make up information
2. Cite sources using [1], [2] notation matching the citation numbers below
3. If the context doesn't answer the question, say: "I don't know based on the provided documents."
4. If some information is missing, explicitly state "Insufficient documentation" for those parts
5. Be factual and concise

Question: {question}

Available sources:
{context}

Answer (use [1], [2] etc. to cite sources):"#;

/// Assemble the prompt for one loop iteration.
pub fn build_iteration_prompt(
    question: &str,
    plan_summary: &str,
    constraints: &PromptConstraints,
    state: &AgentState,
    step_num: usize,
    total_steps: usize,
    reprompt_message: Option<&str>,
) -> String {
    let mut parts = vec![
        TOOL_LOOP_SYSTEM_PROMPT.to_string(),
        String::new(),
        format!("QUESTION: {question}"),
        String::new(),
        format!("PLAN: {plan_summary}"),
        format!("CURRENT STEP: {step_num} of {total_steps}"),
        String::new(),
        constraints::summarize(constraints),
        String::new(),
        format!(
            "TOOL BUDGET: {} calls remaining (max {MAX_TOOL_CALLS})",
            state.remaining_tool_budget()
        ),
        format!("SEARCHES DONE: {}", state.search_count()),
        format!("CITATIONS OPENED: {}", state.opened_citations.len()),
        String::new(),
        "CURRENT CONTEXT:".to_string(),
        state.build_context(),
        String::new(),
    ];

    if !state.opened_citations.is_empty() {
        parts.push("AVAILABLE CITATIONS FOR FINAL:".to_string());
        parts.push(state.build_citation_roster());
        parts.push(String::new());
    }

    if let Some(message) = reprompt_message {
        parts.push("=== CORRECTION REQUIRED ===".to_string());
        parts.push(message.to_string());
        parts.push("===========================".to_string());
        parts.push(String::new());
    }

    parts.push("Output your next action as JSON:".to_string());
    parts.join("\n")
}

/// Assemble the exhaustion-path synthesis prompt from gathered context.
pub fn build_synthesis_prompt(question: &str, context: &str) -> String {
    SYNTHESIS_PROMPT
        .replace("{question}", question)
        .replace("{context}", context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::analyze;

    #[test]
    fn iteration_prompt_includes_budget_and_context() {
        let constraints = analyze("What is the retry policy?");
        let state = AgentState::new(constraints.clone());
        let prompt = build_iteration_prompt(
            "What is the retry policy?",
            "Search; Open; Synthesize",
            &constraints,
            &state,
            1,
            3,
            None,
        );
        assert!(prompt.contains("QUESTION: What is the retry policy?"));
        assert!(prompt.contains("TOOL BUDGET: 5 calls remaining"));
        assert!(prompt.contains("(No information gathered yet)"));
        assert!(!prompt.contains("CORRECTION REQUIRED"));
    }

    #[test]
    fn reprompt_section_appears_when_set() {
        let constraints = analyze("q");
        let state = AgentState::new(constraints.clone());
        let prompt = build_iteration_prompt(
            "q",
            "plan",
            &constraints,
            &state,
            2,
            3,
            Some("Invalid JSON: fix it"),
        );
        assert!(prompt.contains("=== CORRECTION REQUIRED ==="));
        assert!(prompt.contains("Invalid JSON: fix it"));
    }

    #[test]
    fn synthesis_prompt_substitutes_placeholders() {
        let prompt = build_synthesis_prompt("How long?", "[1] notes:\nbackoff: 2s");
        assert!(prompt.contains("Question: How long?"));
        assert!(prompt.contains("backoff: 2s"));
        assert!(!prompt.contains("{question}"));
    }
}
