//! Constraint extraction from user questions.
//!
//! A pure, deterministic pass over the question text that detects implicit
//! and explicit requirements: how many separate searches are expected, how
//! many citations must be opened, whether exact quotes are demanded, which
//! output sections are required, and whether gaps must be disclosed. The
//! validator uses the result to decide whether a proposed answer has done
//! enough work.
//!
//! No generator calls, no I/O. Same question in, same constraints out.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Requirements extracted from the user's question.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptConstraints {
    /// Minimum number of distinct searches the agent must perform.
    pub min_searches: usize,
    /// Topics quoted or emphasized in the question.
    pub required_search_topics: Vec<String>,
    /// Minimum number of `open_citation` calls required.
    pub min_open_citations: usize,
    /// Whether the answer must contain verbatim quoted text.
    pub requires_exact_quote: bool,
    /// What kinds of content must be quoted ("SQL statement", "Redirect URI").
    pub exact_quote_indicators: Vec<String>,
    /// Whether the question asks for conflicting sources to be reconciled.
    pub requires_conflict_resolution: bool,
    /// The resolution rule if one was stated ("newest", "specific").
    pub conflict_resolution_rule: Option<String>,
    /// Section headings the output must include.
    pub required_sections: Vec<String>,
    /// Whether missing information must be called out explicitly.
    pub requires_insufficiency_disclosure: bool,
    /// Rough lower bound on expected answer length, in characters.
    pub estimated_min_answer_length: usize,
    /// Multi-section or otherwise detailed request.
    pub is_complex_query: bool,
}

impl Default for PromptConstraints {
    fn default() -> Self {
        Self {
            min_searches: 1,
            required_search_topics: Vec::new(),
            min_open_citations: 0,
            requires_exact_quote: false,
            exact_quote_indicators: Vec::new(),
            requires_conflict_resolution: false,
            conflict_resolution_rule: None,
            required_sections: Vec::new(),
            requires_insufficiency_disclosure: false,
            estimated_min_answer_length: 50,
            is_complex_query: false,
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("(?i){p}")).unwrap_or_else(|e| panic!("bad pattern {p:?}: {e}"))
        })
        .collect()
}

// Explicit numbers first so "at least 3 tool calls" wins over the generic
// "separate searches" default of 2.
static SEPARATE_SEARCH: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\(at\s+least\s+(\d+)\s+tool\s+call",
        r"at\s+least\s+(\d+)\s+(?:tool\s+)?(?:call|search)",
        r"(\d+)\s+(?:tool\s+)?(?:calls?|searches)",
        r"separate\s+(?:tool\s+)?search(?:es)?",
        r"search\s+(?:for\s+)?(?:each|separately|individually)",
        r"multiple\s+search(?:es)?",
    ])
});

static QUOTED_TOPIC: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r#""([^"]+)""#, r"'([^']+)'", r"`([^`]+)`"]));

static OPEN_CITATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"open\s+(?:the\s+)?(?:top\s+)?(\d+)\s+citation",
        r"open_citation.*?at\s+least\s+(\d+)",
        r"at\s+least\s+(\w+)\s+citations?",
        r"must\s+(?:call\s+)?open_citation",
        r"retrieve\s+(?:full\s+)?text",
        r"read\s+(?:the\s+)?(?:full|detailed|complete)\s+(?:text|content|chunk)",
    ])
});

static EXACT_QUOTE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"exact\s+(?:sql\s+)?(?:statement|query|line|text|quote)",
        r"quote\s+(?:one|the)\s+exact",
        r"verbatim",
        r"word[- ]for[- ]word",
        r"exact\s+(?:redirect\s+)?(?:uri|url)",
        r"copy\s+(?:the\s+)?exact",
    ])
});

static QUOTE_TYPES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"sql\s+statement", "SQL statement"),
        (r"redirect\s+uri", "Redirect URI"),
        (r"url\s+(?:line|config)", "URL configuration"),
        (r"command(?:\s+line)?", "command"),
        (r"config(?:uration)?\s+(?:line|entry)", "configuration"),
    ]
    .iter()
    .map(|(p, label)| (Regex::new(&format!("(?i){p}")).expect("quote type pattern"), *label))
    .collect()
});

static CONFLICT_RESOLUTION: LazyLock<Vec<(Regex, Option<&'static str>)>> = LazyLock::new(|| {
    [
        (r"newest[- ]?dated?\s+(?:doc|document|note)", Some("newest")),
        (r"most\s+recent", Some("newest")),
        (r"latest\s+(?:version|doc)", Some("newest")),
        (r"highest\s+priority", Some("priority")),
        (r"most\s+specific", Some("specific")),
        (r"resolve\s+conflicts?", None),
    ]
    .iter()
    .map(|(p, rule)| (Regex::new(&format!("(?i){p}")).expect("conflict pattern"), *rule))
    .collect()
});

static SECTIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"sections?:\s*([^.]+)",
        r"include\s+(?:the\s+following\s+)?sections?:\s*([^.]+)",
        r"output\s+(?:should\s+)?(?:have|include)\s+([^.]+)",
    ])
});

static INSUFFICIENCY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"insufficient\s+documentation",
        r"explicitly\s+(?:say|state|indicate)\s+(?:when\s+)?(?:information\s+is\s+)?missing",
        r"if\s+(?:not\s+found|missing|unavailable)",
        r"list\s+what\s+(?:was\s+)?(?:searched|tried)",
    ])
});

static SEARCH_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)search\s+(?:for\s+)?(.+?)(?:\.|$)").expect("search list"));

static LIST_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*(?:and\s+)?|\s+and\s+").expect("list split"));

const COMPLEX_KEYWORDS: &[&str] = &[
    "runbook",
    "guide",
    "comprehensive",
    "authoritative",
    "detailed",
    "step-by-step",
    "checklist",
];

fn word_to_num(word: &str) -> Option<usize> {
    match word {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        _ => None,
    }
}

/// Topics from quoted strings in the question, filtered to plausible lengths.
fn extract_quoted_topics(text: &str) -> Vec<String> {
    let mut topics = Vec::new();
    for pattern in QUOTED_TOPIC.iter() {
        for caps in pattern.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let topic = m.as_str().trim();
                if (3..=50).contains(&topic.len()) {
                    topics.push(topic.to_string());
                }
            }
        }
    }
    topics
}

/// Heuristic count of distinct search topics the question implies.
fn count_topic_indicators(text: &str) -> usize {
    let mut count = extract_quoted_topics(text).len();

    if let Some(caps) = SEARCH_LIST.captures(text) {
        if let Some(list_text) = caps.get(1) {
            let parts: Vec<&str> = LIST_SPLIT
                .split(list_text.as_str())
                .filter(|p| p.trim().len() > 3)
                .collect();
            if parts.len() > 1 {
                count = count.max(parts.len());
            }
        }
    }

    count
}

/// Extract implicit and explicit requirements from the user's question.
pub fn analyze(question: &str) -> PromptConstraints {
    let mut constraints = PromptConstraints::default();
    let text = question.to_lowercase();

    // Search requirements.
    for pattern in SEPARATE_SEARCH.iter() {
        if let Some(caps) = pattern.captures(&text) {
            constraints.min_searches = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .map(|n| n.max(2))
                .unwrap_or(2);
            break;
        }
    }

    constraints.required_search_topics = extract_quoted_topics(question);

    let topic_count = count_topic_indicators(&text);
    if topic_count > 1 {
        constraints.min_searches = constraints.min_searches.max(topic_count.min(5));
    }

    // open_citation requirements.
    for pattern in OPEN_CITATION.iter() {
        if let Some(caps) = pattern.captures(&text) {
            constraints.min_open_citations = match caps.get(1) {
                Some(m) => m
                    .as_str()
                    .parse::<usize>()
                    .map(|n| n.max(1))
                    .ok()
                    .or_else(|| word_to_num(&m.as_str().to_lowercase()))
                    .unwrap_or(1),
                None => 1,
            };
            break;
        }
    }

    // Exact quote requirements. Quoting implies opening at least one citation.
    if EXACT_QUOTE.iter().any(|p| p.is_match(&text)) {
        constraints.requires_exact_quote = true;
        constraints.min_open_citations = constraints.min_open_citations.max(1);
    }
    for (pattern, label) in QUOTE_TYPES.iter() {
        if pattern.is_match(&text) {
            constraints.exact_quote_indicators.push((*label).to_string());
        }
    }

    // Conflict resolution.
    for (pattern, rule) in CONFLICT_RESOLUTION.iter() {
        if pattern.is_match(&text) {
            constraints.requires_conflict_resolution = true;
            constraints.conflict_resolution_rule = rule.map(str::to_string);
            break;
        }
    }

    // Required output sections.
    for pattern in SECTIONS.iter() {
        if let Some(caps) = pattern.captures(&text) {
            if let Some(sections_text) = caps.get(1) {
                constraints.required_sections = LIST_SPLIT
                    .split(sections_text.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            break;
        }
    }

    // Insufficiency disclosure.
    constraints.requires_insufficiency_disclosure =
        INSUFFICIENCY.iter().any(|p| p.is_match(&text));

    // Answer complexity estimate.
    let mut min_length = 100usize;
    if !constraints.required_sections.is_empty() {
        min_length += constraints.required_sections.len() * 150;
        constraints.is_complex_query = true;
    }
    if constraints.requires_exact_quote {
        min_length += 100 * constraints.exact_quote_indicators.len().max(1);
    }
    if constraints.requires_conflict_resolution {
        min_length += 100;
    }
    if constraints.min_searches > 2 {
        min_length += 100;
        constraints.is_complex_query = true;
    }
    if COMPLEX_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        min_length += 200;
        constraints.is_complex_query = true;
    }
    constraints.estimated_min_answer_length = min_length.min(2000);

    tracing::debug!(
        min_searches = constraints.min_searches,
        min_open_citations = constraints.min_open_citations,
        requires_exact_quote = constraints.requires_exact_quote,
        topics = ?constraints.required_search_topics,
        "analyzed question constraints"
    );

    constraints
}

/// Render constraints as a requirements block for reprompt messages.
pub fn summarize(constraints: &PromptConstraints) -> String {
    let mut parts = Vec::new();

    if constraints.min_searches > 1 {
        parts.push(format!(
            "Perform at least {} separate searches",
            constraints.min_searches
        ));
    }
    if !constraints.required_search_topics.is_empty() {
        let topics: Vec<String> = constraints
            .required_search_topics
            .iter()
            .take(5)
            .map(|t| format!("\"{t}\""))
            .collect();
        parts.push(format!("Search for these topics: {}", topics.join(", ")));
    }
    if constraints.min_open_citations > 0 {
        parts.push(format!(
            "Open at least {} citation(s) to read full text",
            constraints.min_open_citations
        ));
    }
    if constraints.requires_exact_quote {
        if constraints.exact_quote_indicators.is_empty() {
            parts.push("Include verbatim quotes from the documents".to_string());
        } else {
            parts.push(format!(
                "Quote exact text for: {}",
                constraints.exact_quote_indicators.join(", ")
            ));
        }
    }
    if constraints.requires_conflict_resolution {
        let rule = constraints
            .conflict_resolution_rule
            .as_deref()
            .unwrap_or("explicit rule");
        parts.push(format!("Resolve conflicts using {rule}"));
    }
    if constraints.requires_insufficiency_disclosure {
        parts.push(
            "Explicitly state 'Insufficient documentation' where information is missing"
                .to_string(),
        );
    }

    if parts.is_empty() {
        return "No special constraints detected.".to_string();
    }
    format!("REQUIREMENTS:\n- {}", parts.join("\n- "))
}
