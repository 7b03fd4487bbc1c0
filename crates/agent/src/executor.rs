//! The loop controller.
//!
//! `AgentExecutor` drives one request through the full state machine:
//! planning, the bounded tool loop, the validation gate with bounded
//! reprompts, forced synthesis on exhaustion, and citation grounding.
//! Batch (`run`) and streaming (`run_stream`) share the same core; streaming
//! only adds a channel the trace is mirrored onto.
//!
//! Two invariants hold on every path out of this module: the loop terminates
//! within `MAX_ITERATIONS` generator round trips and `MAX_TOOL_CALLS` tool
//! invocations, and every returned citation maps to a tool result from this
//! run.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use docuagent_core::{Error, GenerateRequest, Generator, GeneratorError, Principal, Result};
use docuagent_tools::ToolSuite;

use crate::action::{self, Action, FinalDraft, ToolKind};
use crate::constraints;
use crate::grounding::{self, GroundedCitation};
use crate::limits::{
    ANSWER_MAX_TOKENS, GENERATION_TIMEOUT_SECS, MAX_ITERATIONS, MAX_MALFORMED_STREAK,
    MAX_QUESTION_LENGTH, MAX_REPROMPTS, MAX_TOOL_CALLS, MAX_UNAVAILABLE_STREAK,
    WALL_CLOCK_BUDGET_SECS,
};
use crate::planner::Planner;
use crate::prompt;
use crate::state::{AgentState, Insufficiency};
use crate::trace::{AgentEvent, TraceEntry};
use crate::validator;

const NO_SOURCES_ANSWER: &str = "I don't know based on the provided documents.";
const SYNTHESIS_ERROR_ANSWER: &str = "I encountered an error generating the answer.";

/// Capacity of the streaming event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The caller-visible result of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub answer: String,
    pub citations: Vec<GroundedCitation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insufficiencies: Vec<Insufficiency>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
}

/// Drives the bounded agent loop for one question at a time. Cheap to clone;
/// each `run` owns its own state and shares nothing with concurrent runs.
#[derive(Clone)]
pub struct AgentExecutor {
    generator: Arc<dyn Generator>,
    tools: ToolSuite,
    planner: Planner,
    wall_clock: Duration,
}

/// Trace bookkeeping for one run: the accumulated entries plus the optional
/// mirror channel for streaming consumers.
struct TraceSink {
    entries: Vec<TraceEntry>,
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl TraceSink {
    fn new(events: Option<mpsc::Sender<AgentEvent>>) -> Self {
        Self {
            entries: Vec::new(),
            events,
        }
    }

    /// Record an entry and mirror it to the stream. A dropped receiver means
    /// the client went away: surface that so the loop stops issuing calls.
    async fn emit(&mut self, entry: TraceEntry) -> Result<()> {
        self.entries.push(entry.clone());
        if let Some(events) = &self.events {
            events
                .send(AgentEvent::Trace(entry))
                .await
                .map_err(|_| Error::Internal("stream consumer disconnected".into()))?;
        }
        Ok(())
    }
}

impl AgentExecutor {
    pub fn new(generator: Arc<dyn Generator>, tools: ToolSuite) -> Self {
        Self {
            planner: Planner::new(Arc::clone(&generator)),
            generator,
            tools,
            wall_clock: Duration::from_secs(WALL_CLOCK_BUDGET_SECS),
        }
    }

    /// Override the wall-clock budget for the whole run.
    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Run the agent and return the composite result.
    pub async fn run(&self, principal: &Principal, question: &str) -> Result<AgentOutcome> {
        self.run_with_events(principal, question, None).await
    }

    /// Run the agent, streaming trace entries as they occur. The channel
    /// carries zero or more trace events and ends with either one `done`
    /// event or one `error` trace entry.
    pub fn run_stream(&self, principal: Principal, question: String) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let executor = self.clone();
        tokio::spawn(async move {
            let result = executor
                .run_with_events(&principal, &question, Some(tx.clone()))
                .await;
            match result {
                Ok(outcome) => {
                    let _ = tx.send(AgentEvent::Done { result: outcome }).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(AgentEvent::Trace(TraceEntry::Error {
                            error: e.to_string(),
                        }))
                        .await;
                }
            }
        });
        rx
    }

    async fn run_with_events(
        &self,
        principal: &Principal,
        question: &str,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidRequest {
                message: "Question is required".into(),
            });
        }
        if question.chars().count() > MAX_QUESTION_LENGTH {
            return Err(Error::InvalidRequest {
                message: format!("Question exceeds {MAX_QUESTION_LENGTH} characters"),
            });
        }

        let deadline = Instant::now() + self.wall_clock;
        let mut sink = TraceSink::new(events);

        info!(question_len = question.len(), "agent run starting");

        let constraints = constraints::analyze(question);
        let plan = self.planner.plan(question).await;
        sink.emit(TraceEntry::Plan {
            steps: plan.steps.clone(),
            notes: plan.is_fallback.then(|| "Fallback plan used".to_string()),
        })
        .await?;

        let mut plan_summary = plan.steps.iter().take(3).cloned().collect::<Vec<_>>().join("; ");
        if plan.steps.len() > 3 {
            plan_summary.push_str(&format!("... (+{} more)", plan.steps.len() - 3));
        }

        let mut state = AgentState::new(constraints.clone());
        let mut malformed_streak = 0usize;
        let mut unavailable_streak = 0usize;
        let mut reprompt_message: Option<String> = None;
        let mut accepted: Option<FinalDraft> = None;
        let mut rejected_draft: Option<FinalDraft> = None;
        let mut timed_out = false;

        while accepted.is_none()
            && state.iteration < MAX_ITERATIONS
            && state.tool_calls_used < MAX_TOOL_CALLS
        {
            state.iteration += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                sink.emit(TraceEntry::Error {
                    error: "Wall-clock budget exhausted".into(),
                })
                .await?;
                timed_out = true;
                break;
            }

            let iteration_prompt = prompt::build_iteration_prompt(
                question,
                &plan_summary,
                &constraints,
                &state,
                state.iteration.min(plan.steps.len()),
                plan.steps.len(),
                reprompt_message.as_deref(),
            );
            reprompt_message = None;

            let request = GenerateRequest::new(iteration_prompt)
                .with_max_tokens(ANSWER_MAX_TOKENS)
                .with_timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS).min(remaining));

            let response = match self.generator.generate(request).await {
                Ok(text) => text,
                Err(GeneratorError::Timeout { timeout_secs }) => {
                    sink.emit(TraceEntry::Error {
                        error: format!("Generation timed out after {timeout_secs}s"),
                    })
                    .await?;
                    timed_out = true;
                    break;
                }
                Err(e) => {
                    sink.emit(TraceEntry::Error {
                        error: format!("Generator error: {e}"),
                    })
                    .await?;
                    break;
                }
            };

            let parsed = match action::parse(&response) {
                Ok(parsed) => {
                    malformed_streak = 0;
                    parsed
                }
                Err(malformed) => {
                    malformed_streak += 1;
                    if malformed_streak >= MAX_MALFORMED_STREAK {
                        state
                            .notes
                            .push(format!("Model output malformed: {malformed}"));
                        break;
                    }
                    reprompt_message =
                        Some(format!("Invalid JSON: {malformed}\nOutput ONLY valid JSON."));
                    continue;
                }
            };

            match parsed {
                Action::ToolCall { tool, input } => {
                    state.tool_calls_used += 1;
                    match self.execute_tool(principal, tool, &input, &mut state).await {
                        Ok((trace_input, summary)) => {
                            unavailable_streak = 0;
                            sink.emit(TraceEntry::ToolCall {
                                tool: tool.as_str().to_string(),
                                input: trace_input,
                                output_summary: summary,
                            })
                            .await?;
                        }
                        Err(e) => {
                            state.notes.push(format!("Tool failed: {e}"));
                            sink.emit(TraceEntry::Error {
                                error: format!("{}: {e}", tool.as_str()),
                            })
                            .await?;
                            if e.is_unavailable() {
                                unavailable_streak += 1;
                                if unavailable_streak >= MAX_UNAVAILABLE_STREAK {
                                    state.record_insufficiency(
                                        "retrieval",
                                        format!(
                                            "{} unavailable after repeated attempts",
                                            tool.as_str()
                                        ),
                                    );
                                    break;
                                }
                            } else {
                                unavailable_streak = 0;
                            }
                        }
                    }
                }
                Action::Final(draft) => {
                    let refs = validator::citation_refs(&draft.answer);
                    let snapshot = state.snapshot();
                    let known_gaps: Vec<Insufficiency> = state
                        .insufficiencies
                        .iter()
                        .chain(draft.insufficiencies.iter())
                        .cloned()
                        .collect();
                    let validation =
                        validator::validate(&draft.answer, &refs, &constraints, &snapshot, &known_gaps);

                    if validation.valid {
                        sink.emit(TraceEntry::Final {
                            notes: format!(
                                "Validated with {} citations",
                                state.opened_citations.len()
                            ),
                        })
                        .await?;
                        accepted = Some(draft);
                    } else {
                        state.reprompt_count += 1;
                        sink.emit(TraceEntry::Validation {
                            validation_errors: validation
                                .errors
                                .iter()
                                .map(|e| e.message.clone())
                                .collect(),
                            notes: format!(
                                "Validation failed (attempt {}/{MAX_REPROMPTS})",
                                state.reprompt_count
                            ),
                        })
                        .await?;

                        if state.reprompt_count >= MAX_REPROMPTS
                            || state.tool_calls_used >= MAX_TOOL_CALLS
                        {
                            // Cannot loop forever: accept the draft and record
                            // what it failed to satisfy.
                            warn!("reprompt budget exhausted, accepting answer with gaps");
                            for issue in &validation.errors {
                                state.record_insufficiency(issue.code, issue.message.clone());
                            }
                            sink.emit(TraceEntry::Final {
                                notes: "Accepted after max reprompts (may have validation issues)"
                                    .to_string(),
                            })
                            .await?;
                            accepted = Some(draft);
                        } else {
                            let message = validator::reprompt_message(
                                &validation,
                                &constraints,
                                state.remaining_tool_budget(),
                            );
                            let mut summary = validation.error_summary();
                            summary.truncate(
                                (0..=summary.len().min(200))
                                    .rev()
                                    .find(|&i| summary.is_char_boundary(i))
                                    .unwrap_or(0),
                            );
                            sink.emit(TraceEntry::Reprompt { notes: summary }).await?;
                            rejected_draft = Some(draft);
                            reprompt_message = Some(message);
                        }
                    }
                }
            }
        }

        let (answer, citations) = match accepted {
            Some(draft) => {
                for gap in draft.insufficiencies.iter().cloned() {
                    state.insufficiencies.push(gap);
                }
                let (cleaned, mut grounded) =
                    grounding::ground(&draft.answer, &draft.used_citations, &state);
                if grounded.is_empty() && !state.search_results.is_empty() {
                    grounded = grounding::fallback_from_search(&state);
                }
                (cleaned, grounded)
            }
            None => {
                self.finish_without_final(question, &mut state, &mut sink, rejected_draft, timed_out, deadline)
                    .await?
            }
        };

        info!(
            tool_calls = state.tool_calls_used,
            iterations = state.iteration,
            citations = citations.len(),
            insufficiencies = state.insufficiencies.len(),
            "agent run completed"
        );

        Ok(AgentOutcome {
            answer,
            citations,
            insufficiencies: state.insufficiencies.clone(),
            trace: sink.entries,
        })
    }

    /// Exhaustion and error paths: no validated `final` was produced.
    ///
    /// Preference order: a draft that failed validation (degraded but real
    /// answer text), forced synthesis over gathered context, the fixed
    /// don't-know answer when nothing was gathered. A timeout without draft
    /// answer text fails the request regardless of what was gathered.
    async fn finish_without_final(
        &self,
        question: &str,
        state: &mut AgentState,
        sink: &mut TraceSink,
        rejected_draft: Option<FinalDraft>,
        timed_out: bool,
        deadline: Instant,
    ) -> Result<(String, Vec<GroundedCitation>)> {
        if let Some(draft) = rejected_draft {
            sink.emit(TraceEntry::Final {
                notes: "Returning last draft answer (budget exhausted)".to_string(),
            })
            .await?;
            let (cleaned, mut grounded) =
                grounding::ground(&draft.answer, &draft.used_citations, state);
            if grounded.is_empty() && !state.search_results.is_empty() {
                grounded = grounding::fallback_from_search(state);
            }
            return Ok((cleaned, grounded));
        }

        // A timeout without any draft answer text fails the request; gathered
        // sources alone are not a partial result.
        if timed_out {
            return Err(Error::Generator(GeneratorError::Timeout {
                timeout_secs: self.wall_clock.as_secs(),
            }));
        }

        let nothing_gathered =
            state.opened_citations.is_empty() && state.search_results.is_empty();

        if nothing_gathered {
            sink.emit(TraceEntry::Final {
                notes: "No relevant sources found".to_string(),
            })
            .await?;
            return Ok((NO_SOURCES_ANSWER.to_string(), Vec::new()));
        }

        // Forced synthesis: one generation call over everything gathered.
        let mut context_parts: Vec<String> = state
            .opened_citations
            .iter()
            .map(|c| format!("[{}] {} (chunk {}):\n{}", c.citation_num, c.filename, c.chunk_index, c.text))
            .collect();
        if context_parts.is_empty() {
            context_parts = state
                .search_results
                .iter()
                .take(3)
                .enumerate()
                .map(|(i, r)| format!("[{}] {}:\n{}", i + 1, r.filename, r.snippet))
                .collect();
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let request = GenerateRequest::new(prompt::build_synthesis_prompt(
            question,
            &context_parts.join("\n\n"),
        ))
        .with_max_tokens(ANSWER_MAX_TOKENS)
        .with_timeout(
            Duration::from_secs(GENERATION_TIMEOUT_SECS).min(remaining.max(Duration::from_secs(1))),
        );

        match self.generator.generate(request).await {
            Ok(text) => {
                let (cleaned, grounded) = grounding::ground(text.trim(), &[], state);
                let citations = if !grounded.is_empty() {
                    grounded
                } else if !state.opened_citations.is_empty() {
                    grounding::all_opened(state)
                } else {
                    grounding::fallback_from_search(state)
                };
                sink.emit(TraceEntry::Final {
                    notes: format!(
                        "Synthesized from {} sources (exhaustion fallback)",
                        citations.len()
                    ),
                })
                .await?;
                Ok((cleaned, citations))
            }
            Err(e) => {
                sink.emit(TraceEntry::Error {
                    error: format!("Synthesis failed: {e}"),
                })
                .await?;
                Ok((SYNTHESIS_ERROR_ANSWER.to_string(), Vec::new()))
            }
        }
    }

    /// Execute one tool call, mutating state. Returns the capped trace input
    /// and a one-line summary.
    async fn execute_tool(
        &self,
        principal: &Principal,
        tool: ToolKind,
        input: &Value,
        state: &mut AgentState,
    ) -> std::result::Result<(Value, String), docuagent_core::ToolError> {
        match tool {
            ToolKind::SearchDocs => {
                let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
                let output = self.tools.search_docs(principal, query).await?;
                state.record_search(query.trim(), &output.results);
                let summary = output.summary();
                let trace_query: String = query.chars().take(100).collect();
                Ok((json!({ "query": trace_query }), summary))
            }
            ToolKind::OpenCitation => {
                let doc_id = input.get("docId").and_then(Value::as_str).unwrap_or_default();
                let chunk_id = input.get("chunkId").and_then(Value::as_str).unwrap_or_default();
                let output = self.tools.open_citation(principal, doc_id, chunk_id).await?;
                let summary = output.summary();
                state.record_opened(output.chunk);
                Ok((json!({ "docId": doc_id, "chunkId": chunk_id }), summary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockGenerator;
    use async_trait::async_trait;
    use docuagent_core::{OpenedChunk, Retriever, SearchHit, ToolError};
    use docuagent_tools::{InMemoryRetriever, StoredChunk};

    /// A retrieval backend that is always down.
    struct UnavailableRetriever;

    #[async_trait]
    impl Retriever for UnavailableRetriever {
        async fn search(
            &self,
            _principal: &Principal,
            _query: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<SearchHit>, ToolError> {
            Err(ToolError::Unavailable("search backend offline".into()))
        }

        async fn open(
            &self,
            _principal: &Principal,
            _doc_id: &str,
            _chunk_id: &str,
        ) -> std::result::Result<OpenedChunk, ToolError> {
            Err(ToolError::Unavailable("search backend offline".into()))
        }
    }

    const PLAN: &str = r#"["Search for relevant documents", "Open the best citations", "Synthesize the answer"]"#;

    fn fixed_suite(principal: &Principal) -> ToolSuite {
        let chunks = vec![
            StoredChunk {
                owner: principal.clone(),
                doc_id: "doc-retry".to_string(),
                chunk_id: "chunk-retry".to_string(),
                chunk_index: 0,
                filename: "retry-policy.md".to_string(),
                text: "Retry Policy\n\nWorkers retry failed jobs with exponential \
                       backoff: 2s initial delay, doubling up to 60s. Exhausted jobs \
                       land in the dead-letter queue."
                    .to_string(),
            },
            StoredChunk {
                owner: principal.clone(),
                doc_id: "doc-limits".to_string(),
                chunk_id: "chunk-limits".to_string(),
                chunk_index: 0,
                filename: "rate-limits.md".to_string(),
                text: "Rate Limits\n\nThe ask endpoint allows 10 requests per minute \
                       per user; exceeding it returns 429."
                    .to_string(),
            },
        ];
        ToolSuite::new(Arc::new(InMemoryRetriever::new(chunks)))
    }

    fn executor(generator: SequentialMockGenerator, principal: &Principal) -> AgentExecutor {
        AgentExecutor::new(Arc::new(generator), fixed_suite(principal))
    }

    fn tool_call_count(outcome: &AgentOutcome, tool: &str) -> usize {
        outcome
            .trace
            .iter()
            .filter(|e| matches!(e, TraceEntry::ToolCall { tool: t, .. } if t == tool))
            .count()
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let principal = Principal::new("u1");
        let executor = executor(SequentialMockGenerator::new(Vec::<&str>::new()), &principal);
        let err = executor.run(&principal, "   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn overlong_question_is_rejected_before_planning() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::new(Vec::<&str>::new());
        let executor = AgentExecutor::new(Arc::new(generator), fixed_suite(&principal));
        let question = "x".repeat(MAX_QUESTION_LENGTH + 1);
        let err = executor.run(&principal, &question).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn always_malformed_generator_terminates() {
        let principal = Principal::new("u1");
        let generator =
            SequentialMockGenerator::repeating(vec![PLAN], "definitely not a json action");
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");
        assert_eq!(outcome.answer, NO_SOURCES_ANSWER);
        assert!(outcome.citations.is_empty());
        assert_eq!(tool_call_count(&outcome, "search_docs"), 0);
    }

    #[tokio::test]
    async fn always_tool_call_generator_stops_at_budget() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::repeating(
            vec![PLAN],
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#,
        );
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");
        assert_eq!(tool_call_count(&outcome, "search_docs"), MAX_TOOL_CALLS);
        assert!(!outcome.answer.is_empty());
        assert!(!outcome.citations.is_empty());
    }

    #[tokio::test]
    async fn premature_final_is_reprompted() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::new(vec![
            PLAN,
            // Finalizes before searching anything.
            r#"{"type": "final", "answer": "Retries use exponential backoff."}"#,
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#,
            r#"{"type": "final", "answer": "Retries start at a 2s backoff [1]."}"#,
        ]);
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");

        assert!(outcome
            .trace
            .iter()
            .any(|e| matches!(e, TraceEntry::Validation { .. })));
        assert!(outcome
            .trace
            .iter()
            .any(|e| matches!(e, TraceEntry::Reprompt { .. })));
        assert!(outcome.answer.contains("[1]"));
        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.citations[0].doc_id, "doc-retry");
    }

    #[tokio::test]
    async fn unknown_tool_burns_a_format_reprompt_not_a_tool_call() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::new(vec![
            PLAN,
            r#"{"type": "tool_call", "tool": "delete_everything", "input": {}}"#,
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "rate limits"}}"#,
            r#"{"type": "final", "answer": "Ten requests per minute [1]."}"#,
        ]);
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What are the rate limits?")
            .await
            .expect("outcome");
        assert_eq!(tool_call_count(&outcome, "search_docs"), 1);
        assert!(outcome.answer.contains("Ten requests"));
    }

    #[tokio::test]
    async fn zero_wall_clock_times_out() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::repeating(vec![PLAN], "{}");
        let executor = AgentExecutor::new(Arc::new(generator), fixed_suite(&principal))
            .with_wall_clock(Duration::ZERO);
        let err = executor
            .run(&principal, "What is the retry policy?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Generator(GeneratorError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_with_sources_but_no_draft_is_a_failure() {
        let principal = Principal::new("u1");
        // One successful search, then the clock runs out before any answer
        // text exists. Gathered sources alone are not a partial result.
        let generator = Arc::new(SequentialMockGenerator::scripted(vec![
            Ok(PLAN.to_string()),
            Ok(r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#
                .to_string()),
            Err(GeneratorError::Timeout { timeout_secs: 30 }),
        ]));
        let executor = AgentExecutor::new(generator.clone(), fixed_suite(&principal));
        let err = executor
            .run(&principal, "What is the retry policy?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Generator(GeneratorError::Timeout { .. })
        ));
        // The search did happen before the failure.
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn timeout_with_rejected_draft_returns_degraded_answer() {
        let principal = Principal::new("u1");
        // A draft that fails validation, then a timeout: the draft's answer
        // text makes this a degraded result instead of a failure.
        let generator = SequentialMockGenerator::scripted(vec![
            Ok(PLAN.to_string()),
            Ok(r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#
                .to_string()),
            Ok(r#"{"type": "final", "answer": "Retries use exponential backoff [9].", "used_citations": [], "insufficiencies": []}"#
                .to_string()),
            Err(GeneratorError::Timeout { timeout_secs: 30 }),
        ]);
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");
        assert!(outcome.answer.contains("exponential backoff"));
        assert!(!outcome.answer.contains("[9]"));
    }

    #[tokio::test]
    async fn unavailable_retriever_forces_retrieval_insufficiency() {
        let principal = Principal::new("u1");
        let generator = Arc::new(SequentialMockGenerator::repeating(
            vec![PLAN],
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#,
        ));
        let executor = AgentExecutor::new(
            generator.clone(),
            ToolSuite::new(Arc::new(UnavailableRetriever)),
        );
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");

        // Each failed call consumed budget: plan + exactly two loop
        // iterations before the unavailable streak ended the run.
        assert_eq!(generator.call_count(), 1 + MAX_UNAVAILABLE_STREAK);
        let failures = outcome
            .trace
            .iter()
            .filter(|e| matches!(e, TraceEntry::Error { error } if error.starts_with("search_docs")))
            .count();
        assert_eq!(failures, MAX_UNAVAILABLE_STREAK);

        assert_eq!(outcome.answer, NO_SOURCES_ANSWER);
        assert!(
            outcome
                .insufficiencies
                .iter()
                .any(|gap| gap.section == "retrieval" && gap.missing.contains("unavailable"))
        );
    }

    #[tokio::test]
    async fn multibyte_question_under_char_limit_is_accepted() {
        let principal = Principal::new("u1");
        // Twice the limit in bytes, exactly at the limit in characters.
        let question = "é".repeat(MAX_QUESTION_LENGTH);
        let generator = SequentialMockGenerator::new(Vec::<&str>::new());
        let executor = AgentExecutor::new(Arc::new(generator), fixed_suite(&principal));
        let outcome = executor.run(&principal, &question).await.expect("outcome");
        assert_eq!(outcome.answer, NO_SOURCES_ANSWER);
    }

    #[tokio::test]
    async fn e2e_multi_search_exact_quote_scenario() {
        let principal = Principal::new("u1");
        let question = "Search for \"retry backoff\", \"rate limits\", and \"dead-letter queue\" \
                        separately and open at least two citations, then quote the exact text of \
                        the retry backoff setting.";
        let generator = SequentialMockGenerator::new(vec![
            PLAN.to_string(),
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#.to_string(),
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "rate limits"}}"#.to_string(),
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "dead-letter queue"}}"#.to_string(),
            r#"{"type": "tool_call", "tool": "open_citation", "input": {"docId": "doc-retry", "chunkId": "chunk-retry"}}"#.to_string(),
            r#"{"type": "tool_call", "tool": "open_citation", "input": {"docId": "doc-limits", "chunkId": "chunk-limits"}}"#.to_string(),
            // Budget exhausted after five calls; this response answers the
            // forced synthesis prompt.
            "The retry setting is `backoff: 2s initial delay` [1].".to_string(),
        ]);
        let executor = executor(generator, &principal);
        let outcome = executor.run(&principal, question).await.expect("outcome");

        assert_eq!(tool_call_count(&outcome, "search_docs"), 3);
        assert_eq!(tool_call_count(&outcome, "open_citation"), 2);
        assert!(outcome.answer.contains("2s"));
        assert!(outcome.answer.contains("[1]"), "marker survived grounding");
        assert!(!outcome.citations.is_empty());
        for citation in &outcome.citations {
            assert!(
                citation.doc_id == "doc-retry" || citation.doc_id == "doc-limits",
                "citation must trace to an opened chunk"
            );
        }
    }

    #[tokio::test]
    async fn validation_exhaustion_accepts_with_insufficiencies() {
        let principal = Principal::new("u1");
        // min_searches inferred as 3; the model keeps finalizing after one.
        let question = "Search for \"alpha topic\", \"beta topic\", and \"gamma topic\".";
        let generator = SequentialMockGenerator::repeating(
            vec![
                PLAN,
                r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#,
            ],
            r#"{"type": "final", "answer": "Retries back off starting at 2s [1]."}"#,
        );
        let executor = executor(generator, &principal);
        let outcome = executor.run(&principal, question).await.expect("outcome");

        let validations = outcome
            .trace
            .iter()
            .filter(|e| matches!(e, TraceEntry::Validation { .. }))
            .count();
        assert_eq!(validations, MAX_REPROMPTS);
        assert!(!outcome.insufficiencies.is_empty());
        assert!(outcome.answer.contains("2s"));
    }

    #[tokio::test]
    async fn run_stream_emits_trace_then_done() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::new(vec![
            PLAN,
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "rate limits"}}"#,
            r#"{"type": "final", "answer": "Ten requests per minute [1]."}"#,
        ]);
        let executor = executor(generator, &principal);
        let mut rx = executor.run_stream(principal.clone(), "What are the rate limits?".to_string());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(events.len() >= 3);
        assert_eq!(events[0].event_type(), "plan");
        match events.last().expect("at least one event") {
            AgentEvent::Done { result } => {
                assert!(result.answer.contains("Ten requests"));
            }
            other => panic!("expected done, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn hallucinated_marker_is_stripped_from_result() {
        let principal = Principal::new("u1");
        let generator = SequentialMockGenerator::new(vec![
            PLAN,
            r#"{"type": "tool_call", "tool": "search_docs", "input": {"query": "retry backoff"}}"#,
            r#"{"type": "tool_call", "tool": "open_citation", "input": {"docId": "doc-retry", "chunkId": "chunk-retry"}}"#,
            r#"{"type": "final", "answer": "Backoff starts at 2s [1], per the runbook [7]."}"#,
        ]);
        let executor = executor(generator, &principal);
        let outcome = executor
            .run(&principal, "What is the retry policy?")
            .await
            .expect("outcome");
        assert!(!outcome.answer.contains("[7]"));
        assert!(outcome.answer.contains("[1]"));
        assert_eq!(outcome.citations.len(), 1);
    }
}
