//! The validation gate.
//!
//! Every candidate `final` action passes through `validate` before it can be
//! accepted. Each check produces its own coded error; the result aggregates
//! all of them and is never mutated afterwards. A failed validation drives a
//! bounded reprompt in the loop controller.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::constraints::{self, PromptConstraints};
use crate::state::{Insufficiency, StateSnapshot};

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

/// Outcome of validating one candidate answer. `valid` is true exactly when
/// `errors` is empty; warnings never fail validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, code: &'static str, message: String) {
        self.errors.push(ValidationIssue { code, message });
        self.valid = false;
    }

    fn warning(&mut self, code: &'static str, message: String) {
        self.warnings.push(ValidationIssue { code, message });
    }

    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "No errors.".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("- {}", e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Operational terms that must never be invented. If one appears in the
/// answer it has to appear verbatim in some retrieved or opened text.
const SUSPICIOUS_TERMS: &[&str] = &[
    "pg_reindex",
    "reindex",
    "vacuum",
    "vacuum analyze",
    "analyze table",
    "kubectl",
    "helm",
    "docker compose",
    "systemctl",
    "ansible",
    "drop table",
    "truncate",
    "alter table",
    "create index",
    "according to best practices",
    "as recommended",
    "typically",
];

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern"));
static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^`]*```").expect("fenced block pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]+`").expect("inline code pattern"));
static QUOTED_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]{10,}""#).expect("quoted text pattern"));
static DONT_KNOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"i don't know|i cannot find|no relevant information").expect("dont-know pattern")
});

/// Inline `[n]` marker indices found in an answer, in order of appearance.
pub fn citation_refs(answer: &str) -> Vec<usize> {
    MARKER
        .captures_iter(answer)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

fn check_empty_answer(answer: &str, snapshot: &StateSnapshot, result: &mut ValidationResult) {
    if answer.trim().is_empty() {
        result.error(
            "EMPTY_ANSWER",
            "Answer is empty. Provide a substantive response.".to_string(),
        );
        return;
    }
    let has_sources = snapshot.open_citation_count > 0 || !snapshot.search_snippets.is_empty();
    if has_sources && answer.len() < 100 && DONT_KNOW.is_match(&answer.to_lowercase()) {
        result.warning(
            "UNEXPLAINED_DONT_KNOW",
            "Answer claims no information found, but sources were retrieved. \
             Explain what was searched and why it doesn't answer the question."
                .to_string(),
        );
    }
}

fn check_min_searches(
    snapshot: &StateSnapshot,
    constraints: &PromptConstraints,
    result: &mut ValidationResult,
) {
    if snapshot.search_count < constraints.min_searches {
        let topics: Vec<&str> = constraints
            .required_search_topics
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        result.error(
            "MIN_SEARCHES_UNMET",
            format!(
                "Required at least {} separate searches, but only {} were performed. \
                 Topics to search: {:?}",
                constraints.min_searches, snapshot.search_count, topics
            ),
        );
    }
}

fn check_min_open_citations(
    snapshot: &StateSnapshot,
    constraints: &PromptConstraints,
    result: &mut ValidationResult,
) {
    if constraints.min_open_citations > 0
        && snapshot.open_citation_count < constraints.min_open_citations
    {
        result.error(
            "MIN_OPEN_CITATIONS_UNMET",
            format!(
                "Required to open at least {} citation(s), but only {} were opened. \
                 Call open_citation on search results before finalizing.",
                constraints.min_open_citations, snapshot.open_citation_count
            ),
        );
    }
}

fn check_citation_references(
    citation_refs: &[usize],
    snapshot: &StateSnapshot,
    result: &mut ValidationResult,
) {
    // Markers resolve against opened citations when any exist, otherwise
    // against search results. Out-of-range markers fail validation here and
    // are stripped at grounding time.
    let max_valid = if snapshot.open_citation_count > 0 {
        snapshot.open_citation_count
    } else {
        snapshot.search_snippets.len()
    };

    for &r in citation_refs {
        if r < 1 || r > max_valid {
            result.error(
                "INVALID_CITATION_REF",
                format!(
                    "Citation [{r}] does not correspond to a retrieved source. \
                     Only citations [1] through [{max_valid}] are valid."
                ),
            );
        }
    }
}

fn check_grounded_claims(answer: &str, snapshot: &StateSnapshot, result: &mut ValidationResult) {
    let answer_lower = answer.to_lowercase();
    let mut corpus = snapshot.opened_citation_texts.join(" ");
    corpus.push(' ');
    corpus.push_str(&snapshot.search_snippets.join(" "));
    let corpus = corpus.to_lowercase();

    if corpus.trim().is_empty() {
        if SUSPICIOUS_TERMS.iter().any(|t| answer_lower.contains(t)) {
            result.error(
                "UNGROUNDED_CLAIM_NO_CONTEXT",
                "Answer contains specific technical claims but no source material was \
                 retrieved. Perform searches and open citations before making claims."
                    .to_string(),
            );
        }
        return;
    }

    let ungrounded: Vec<&str> = SUSPICIOUS_TERMS
        .iter()
        .filter(|t| answer_lower.contains(*t) && !corpus.contains(*t))
        .copied()
        .collect();

    if !ungrounded.is_empty() {
        let mut terms = ungrounded
            .iter()
            .take(3)
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(", ");
        if ungrounded.len() > 3 {
            terms.push_str(&format!(" and {} more", ungrounded.len() - 3));
        }
        result.error(
            "UNGROUNDED_CLAIM",
            format!(
                "These terms appear in the answer but not in any retrieved source: {terms}. \
                 Only include information that appears in the documents."
            ),
        );
    }
}

/// Quoted or code-formatted segments of the answer, ten chars or longer.
fn extract_quotes(answer: &str) -> Vec<String> {
    let mut quotes = Vec::new();
    for pattern in [&*CODE_BLOCK, &*INLINE_CODE, &*QUOTED_TEXT] {
        for m in pattern.find_iter(answer) {
            let cleaned = m.as_str().trim_matches(['`', '"']).trim();
            if cleaned.len() >= 10 {
                quotes.push(cleaned.to_string());
            }
        }
    }
    quotes
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn check_exact_quote(
    answer: &str,
    constraints: &PromptConstraints,
    snapshot: &StateSnapshot,
    result: &mut ValidationResult,
) {
    if !constraints.requires_exact_quote {
        return;
    }

    if snapshot.open_citation_count == 0 {
        result.error(
            "EXACT_QUOTE_NO_SOURCE",
            format!(
                "Exact quote is required for {:?}, but no citations were opened. \
                 Call open_citation first.",
                constraints.exact_quote_indicators
            ),
        );
        return;
    }

    let quotes = extract_quotes(answer);
    if quotes.is_empty() {
        result.error(
            "NO_QUOTED_TEXT",
            format!(
                "Exact quote was required for {:?}, but no code blocks or quoted text \
                 found in answer.",
                constraints.exact_quote_indicators
            ),
        );
        return;
    }

    let corpus = snapshot.opened_citation_texts.join("\n");
    let normalized_corpus = collapse_ws(&corpus);
    let grounded = quotes
        .iter()
        .any(|q| corpus.contains(q.as_str()) || normalized_corpus.contains(&collapse_ws(q)));

    if !grounded {
        result.error(
            "QUOTE_NOT_VERBATIM",
            "Found quoted text in answer, but it doesn't appear verbatim in opened \
             citations. Ensure quotes match the exact text from documents."
                .to_string(),
        );
    }
}

fn check_insufficiency_disclosure(
    answer: &str,
    constraints: &PromptConstraints,
    insufficiencies: &[Insufficiency],
    result: &mut ValidationResult,
) {
    if !constraints.requires_insufficiency_disclosure || insufficiencies.is_empty() {
        return;
    }

    const MARKERS: &[&str] = &[
        "insufficient documentation",
        "not found in documents",
        "missing from documentation",
        "no documentation available",
        "could not find",
    ];
    let answer_lower = answer.to_lowercase();
    if !MARKERS.iter().any(|m| answer_lower.contains(m)) {
        let sections: Vec<&str> = insufficiencies.iter().map(|i| i.section.as_str()).collect();
        result.error(
            "MISSING_INSUFFICIENCY_DISCLOSURE",
            format!(
                "Information gaps were found but not explicitly disclosed. \
                 State 'Insufficient documentation' for: {sections:?}"
            ),
        );
    }
}

/// Validate a candidate final answer against constraints and state.
pub fn validate(
    answer: &str,
    citation_refs: &[usize],
    constraints: &PromptConstraints,
    snapshot: &StateSnapshot,
    insufficiencies: &[Insufficiency],
) -> ValidationResult {
    let mut result = ValidationResult::new();

    check_empty_answer(answer, snapshot, &mut result);
    check_min_searches(snapshot, constraints, &mut result);
    check_min_open_citations(snapshot, constraints, &mut result);
    check_citation_references(citation_refs, snapshot, &mut result);
    check_grounded_claims(answer, snapshot, &mut result);
    check_exact_quote(answer, constraints, snapshot, &mut result);
    check_insufficiency_disclosure(answer, constraints, insufficiencies, &mut result);

    tracing::debug!(
        valid = result.valid,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "validated candidate answer"
    );

    result
}

/// Correction message sent back to the generator after a failed validation.
pub fn reprompt_message(
    validation: &ValidationResult,
    constraints: &PromptConstraints,
    remaining_tool_budget: usize,
) -> String {
    let mut lines = vec![
        "VALIDATION FAILED - Your answer does not meet requirements.".to_string(),
        String::new(),
        "ERRORS:".to_string(),
        validation.error_summary(),
        String::new(),
        constraints::summarize(constraints),
        String::new(),
        format!("REMAINING TOOL BUDGET: {remaining_tool_budget} calls"),
        String::new(),
    ];

    if remaining_tool_budget > 0 {
        lines.push(
            "You MUST output a TOOL_CALL to gather more information before finalizing.".to_string(),
        );
        lines.push("Output ONLY valid JSON in TOOL_CALL format.".to_string());
    } else {
        lines.push("Tool budget exhausted. Output FINAL with explicit insufficiency notes.".to_string());
        lines.push("Include \"insufficiencies\" array listing what could not be found.".to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(searches: usize, opens: usize, texts: &[&str]) -> StateSnapshot {
        StateSnapshot {
            search_count: searches,
            search_queries: (0..searches).map(|i| format!("query {i}")).collect(),
            open_citation_count: opens,
            opened_citation_texts: texts.iter().map(|t| t.to_string()).collect(),
            search_snippets: (0..searches).map(|i| format!("snippet {i}")).collect(),
        }
    }

    #[test]
    fn extracts_citation_refs_in_order() {
        assert_eq!(citation_refs("see [2] then [1], also [2]"), vec![2, 1, 2]);
        assert!(citation_refs("no markers here").is_empty());
    }

    #[test]
    fn premature_finalization_fails_min_searches() {
        let constraints = PromptConstraints {
            min_searches: 3,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 0, &[]);
        let result = validate("An answer.", &[], &constraints, &snapshot, &[]);
        assert!(!result.valid);
        let err = result
            .errors
            .iter()
            .find(|e| e.code == "MIN_SEARCHES_UNMET")
            .expect("search error");
        assert!(err.message.contains('3'));
        assert!(err.message.contains('1'));
    }

    #[test]
    fn min_open_citations_enforced() {
        let constraints = PromptConstraints {
            min_open_citations: 2,
            ..Default::default()
        };
        let snapshot = snapshot_with(2, 1, &["some text"]);
        let result = validate("An answer [1].", &[1], &constraints, &snapshot, &[]);
        assert!(result.errors.iter().any(|e| e.code == "MIN_OPEN_CITATIONS_UNMET"));
    }

    #[test]
    fn out_of_range_marker_is_an_error() {
        let snapshot = snapshot_with(1, 2, &["a", "b"]);
        let result = validate(
            "See [1] and [5].",
            &[1, 5],
            &PromptConstraints::default(),
            &snapshot,
            &[],
        );
        assert!(result.errors.iter().any(|e| e.code == "INVALID_CITATION_REF"));
    }

    #[test]
    fn empty_answer_rejected() {
        let snapshot = snapshot_with(1, 0, &[]);
        let result = validate("   ", &[], &PromptConstraints::default(), &snapshot, &[]);
        assert!(result.errors.iter().any(|e| e.code == "EMPTY_ANSWER"));
    }

    #[test]
    fn suspicious_term_must_be_grounded() {
        let snapshot = snapshot_with(1, 1, &["Restart the service after deploy."]);
        let result = validate(
            "Run kubectl rollout restart on the deployment.",
            &[],
            &PromptConstraints::default(),
            &snapshot,
            &[],
        );
        assert!(result.errors.iter().any(|e| e.code == "UNGROUNDED_CLAIM"));
    }

    #[test]
    fn suspicious_term_in_source_passes() {
        let snapshot = snapshot_with(1, 1, &["Maintenance runs REINDEX weekly."]);
        let result = validate(
            "The docs say to run reindex weekly [1].",
            &[1],
            &PromptConstraints::default(),
            &snapshot,
            &[],
        );
        assert!(!result.errors.iter().any(|e| e.code == "UNGROUNDED_CLAIM"));
    }

    #[test]
    fn exact_quote_without_opened_citation_fails() {
        let constraints = PromptConstraints {
            requires_exact_quote: true,
            min_searches: 1,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 0, &[]);
        let result = validate("The value is `backoff: 2s`.", &[], &constraints, &snapshot, &[]);
        assert!(result.errors.iter().any(|e| e.code == "EXACT_QUOTE_NO_SOURCE"));
    }

    #[test]
    fn quote_not_in_source_fails() {
        let constraints = PromptConstraints {
            requires_exact_quote: true,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 1, &["The retry policy uses backoff: 2s initial delay."]);
        let result = validate(
            "The value is `backoff: 30s exactly`.",
            &[],
            &constraints,
            &snapshot,
            &[],
        );
        assert!(result.errors.iter().any(|e| e.code == "QUOTE_NOT_VERBATIM"));
    }

    #[test]
    fn verbatim_quote_passes() {
        let constraints = PromptConstraints {
            requires_exact_quote: true,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 1, &["The retry policy uses backoff: 2s initial delay."]);
        let result = validate(
            "The configured value is `backoff: 2s initial delay` [1].",
            &[1],
            &constraints,
            &snapshot,
            &[],
        );
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_quote_entirely_fails() {
        let constraints = PromptConstraints {
            requires_exact_quote: true,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 1, &["backoff: 2s"]);
        let result = validate("It backs off for a bit [1].", &[1], &constraints, &snapshot, &[]);
        assert!(result.errors.iter().any(|e| e.code == "NO_QUOTED_TEXT"));
    }

    #[test]
    fn undisclosed_gaps_fail_when_disclosure_required() {
        let constraints = PromptConstraints {
            requires_insufficiency_disclosure: true,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 1, &["some text"]);
        let gaps = vec![Insufficiency {
            section: "Rollback".to_string(),
            missing: "no rollback steps documented".to_string(),
            queries_tried: vec!["rollback".to_string()],
        }];
        let result = validate("All good [1].", &[1], &constraints, &snapshot, &gaps);
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "MISSING_INSUFFICIENCY_DISCLOSURE"));

        let disclosed = validate(
            "Insufficient documentation for rollback steps [1].",
            &[1],
            &constraints,
            &snapshot,
            &gaps,
        );
        assert!(!disclosed
            .errors
            .iter()
            .any(|e| e.code == "MISSING_INSUFFICIENCY_DISCLOSURE"));
    }

    #[test]
    fn reprompt_demands_tool_call_while_budget_remains() {
        let constraints = PromptConstraints {
            min_searches: 2,
            ..Default::default()
        };
        let snapshot = snapshot_with(1, 0, &[]);
        let validation = validate("Answer.", &[], &constraints, &snapshot, &[]);
        let msg = reprompt_message(&validation, &constraints, 3);
        assert!(msg.starts_with("VALIDATION FAILED"));
        assert!(msg.contains("TOOL_CALL"));
        assert!(msg.contains("REMAINING TOOL BUDGET: 3"));

        let exhausted = reprompt_message(&validation, &constraints, 0);
        assert!(exhausted.contains("insufficiencies"));
    }
}
