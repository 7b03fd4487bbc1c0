//! Strict action parsing.
//!
//! Every iteration the generator must emit exactly one JSON object, either a
//! `tool_call` or a `final`. Anything else, extra prose, missing fields, an
//! unknown tool name, is a [`MalformedAction`] the loop handles with a bounded
//! reprompt. There is deliberately no third action variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Insufficiency;

/// The two tools the executor may invoke. A fixed set: actions naming
/// anything else are rejected at parse time, not silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    SearchDocs,
    OpenCitation,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchDocs => "search_docs",
            Self::OpenCitation => "open_citation",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "search_docs" => Some(Self::SearchDocs),
            "open_citation" => Some(Self::OpenCitation),
            _ => None,
        }
    }
}

/// A citation reference the generator claims to have used in a `final` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CitationRef {
    pub doc_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
}

/// Payload of an accepted `final` action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalDraft {
    pub answer: String,
    pub used_citations: Vec<CitationRef>,
    pub insufficiencies: Vec<Insufficiency>,
}

/// A parsed generator action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall { tool: ToolKind, input: Value },
    Final(FinalDraft),
}

/// Why an output failed to parse. The message is surfaced verbatim in the
/// format-reminder reprompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedAction {
    pub reason: String,
}

impl MalformedAction {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MalformedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Strip a surrounding markdown code fence, if present. Models wrap JSON in
/// ```json fences often enough that rejecting the fence alone would burn a
/// reprompt for no signal.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.trim_start_matches(['\r', '\n']).strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

fn parse_citation_refs(value: Option<&Value>) -> Vec<CitationRef> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_insufficiencies(value: Option<&Value>) -> Vec<Insufficiency> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_tool_call(data: &Value) -> Result<Action, MalformedAction> {
    let name = data.get("tool").and_then(Value::as_str).unwrap_or_default();
    let tool = ToolKind::from_name(name).ok_or_else(|| {
        MalformedAction::new(format!(
            "Unknown tool: {name:?}. Use 'search_docs' or 'open_citation'."
        ))
    })?;

    let input = match data.get("input") {
        Some(v @ Value::Object(_)) => v.clone(),
        Some(_) => return Err(MalformedAction::new("'input' must be an object")),
        None => Value::Object(Default::default()),
    };

    Ok(Action::ToolCall { tool, input })
}

fn parse_final(data: &Value) -> Result<Action, MalformedAction> {
    let answer = match data.get("answer") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(MalformedAction::new("'answer' must be a string")),
        None => return Err(MalformedAction::new("'answer' is required for final")),
    };

    let used = data
        .get("used_citations")
        .or_else(|| data.get("usedCitations"))
        .or_else(|| data.get("citations"));

    Ok(Action::Final(FinalDraft {
        answer,
        used_citations: parse_citation_refs(used),
        insufficiencies: parse_insufficiencies(data.get("insufficiencies")),
    }))
}

/// Parse raw generator output into an [`Action`].
///
/// The output must be exactly one JSON object (a surrounding markdown fence
/// is tolerated). The `type` field selects the variant; when it is absent the
/// shape is inferred from which required fields are present.
pub fn parse(output: &str) -> Result<Action, MalformedAction> {
    let text = strip_code_fence(output);
    if text.is_empty() {
        return Err(MalformedAction::new("Empty response"));
    }
    if !text.starts_with('{') {
        return Err(MalformedAction::new("No JSON object found in response"));
    }

    let data: Value = serde_json::from_str(text).map_err(|e| {
        let mut msg = e.to_string();
        msg.truncate(
            (0..=msg.len().min(80))
                .rev()
                .find(|&i| msg.is_char_boundary(i))
                .unwrap_or(0),
        );
        MalformedAction::new(format!("Invalid JSON: {msg}"))
    })?;

    match data.get("type").and_then(Value::as_str) {
        Some(t) if t.eq_ignore_ascii_case("tool_call") => parse_tool_call(&data),
        Some(t) if t.eq_ignore_ascii_case("final") => parse_final(&data),
        Some(t) => Err(MalformedAction::new(format!(
            "Unknown action type: {t:?}. Use 'tool_call' or 'final'."
        ))),
        None => {
            // Infer from structure when the type tag was omitted.
            if data.get("tool").is_some() && data.get("input").is_some() {
                parse_tool_call(&data)
            } else if data.get("answer").is_some() {
                parse_final(&data)
            } else {
                Err(MalformedAction::new(
                    "Missing 'type' field. Use 'tool_call' or 'final'.",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_search_tool_call() {
        let action =
            parse(r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retries"}}"#)
                .expect("action");
        match action {
            Action::ToolCall { tool, input } => {
                assert_eq!(tool, ToolKind::SearchDocs);
                assert_eq!(input["query"], "retries");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn parses_final_with_citations() {
        let raw = json!({
            "type": "final",
            "answer": "Retries back off exponentially [1].",
            "used_citations": [{"docId": "d1", "chunkId": "c1", "chunkIndex": 0}],
            "insufficiencies": []
        })
        .to_string();
        match parse(&raw).expect("action") {
            Action::Final(draft) => {
                assert!(draft.answer.contains("[1]"));
                assert_eq!(draft.used_citations.len(), 1);
                assert_eq!(draft.used_citations[0].doc_id, "d1");
            }
            other => panic!("expected final, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tool() {
        let err = parse(r#"{"type": "tool_call", "tool": "delete_docs", "input": {}}"#)
            .expect_err("must reject");
        assert!(err.reason.contains("Unknown tool"));
    }

    #[test]
    fn rejects_prose() {
        assert!(parse("I think I should search the documents first.").is_err());
    }

    #[test]
    fn rejects_trailing_prose_after_json() {
        assert!(parse(r#"{"type": "final", "answer": "x"} hope that helps!"#).is_err());
    }

    #[test]
    fn rejects_missing_answer() {
        assert!(parse(r#"{"type": "final"}"#).is_err());
    }

    #[test]
    fn infers_tool_call_without_type_tag() {
        let action = parse(r#"{"tool": "open_citation", "input": {"docId": "d", "chunkId": "c"}}"#)
            .expect("action");
        assert!(matches!(
            action,
            Action::ToolCall {
                tool: ToolKind::OpenCitation,
                ..
            }
        ));
    }

    #[test]
    fn infers_final_without_type_tag() {
        let action = parse(r#"{"answer": "done"}"#).expect("action");
        assert!(matches!(action, Action::Final(_)));
    }

    #[test]
    fn accepts_fenced_json() {
        let raw = "```json\n{\"type\": \"final\", \"answer\": \"ok then\"}\n```";
        assert!(matches!(parse(raw), Ok(Action::Final(_))));
    }

    #[test]
    fn malformed_citation_entries_are_skipped() {
        let raw = json!({
            "type": "final",
            "answer": "fine [1]",
            "used_citations": ["not-an-object", {"docId": "d", "chunkId": "c", "chunkIndex": 1}]
        })
        .to_string();
        match parse(&raw).expect("action") {
            Action::Final(draft) => assert_eq!(draft.used_citations.len(), 1),
            other => panic!("expected final, got {other:?}"),
        }
    }
}
