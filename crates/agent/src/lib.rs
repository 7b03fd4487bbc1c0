//! The bounded agent executor — the heart of DocuAgent.
//!
//! Turns a natural-language question into a grounded, citation-backed answer
//! through a strict state machine:
//!
//! 1. **Analyze** the question for implicit requirements (searches required,
//!    citations to open, exact quotes, disclosure rules)
//! 2. **Plan** 2–5 steps via one generator call, with a guaranteed fallback
//! 3. **Iterate** a tool loop under hard budgets (`TOOL_CALL` / `FINAL`
//!    protocol), executing `search_docs` and `open_citation`
//! 4. **Validate** every proposed final answer against the extracted
//!    requirements; reprompt on failure, bounded
//! 5. **Ground** every inline citation marker against tools actually invoked,
//!    stripping anything unverifiable
//!
//! Two invariants hold on every path: the loop always terminates within
//! bounded steps, and no returned citation can reference content that was not
//! retrieved or opened during the run.

pub mod action;
pub mod constraints;
pub mod executor;
pub mod grounding;
pub mod limits;
pub mod planner;
pub mod prompt;
pub mod state;
pub mod trace;
pub mod validator;

pub use action::{Action, CitationRef, FinalDraft, MalformedAction, ToolKind};
pub use constraints::PromptConstraints;
pub use executor::{AgentExecutor, AgentOutcome};
pub use grounding::GroundedCitation;
pub use planner::{Plan, Planner};
pub use state::{AgentState, Insufficiency, StateSnapshot};
pub use trace::{AgentEvent, TraceEntry};
pub use validator::{ValidationIssue, ValidationResult};

#[cfg(test)]
pub(crate) mod test_helpers;
