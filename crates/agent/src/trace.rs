//! Structured execution trace.
//!
//! Every controller transition produces a [`TraceEntry`]. Entries carry
//! metadata only, never raw document text beyond a capped summary. In batch
//! mode the full sequence is returned with the result; in streaming mode
//! each entry is pushed onto a channel as it occurs, followed by one
//! terminal event carrying the composite result.

use serde::Serialize;
use serde_json::Value;

/// One entry in the execution trace, tagged by transition kind.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TraceEntry {
    Plan {
        steps: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    ToolCall {
        tool: String,
        input: Value,
        output_summary: String,
    },
    Validation {
        validation_errors: Vec<String>,
        notes: String,
    },
    Reprompt {
        notes: String,
    },
    Final {
        notes: String,
    },
    Error {
        error: String,
    },
}

impl TraceEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::ToolCall { .. } => "tool_call",
            Self::Validation { .. } => "validation",
            Self::Reprompt { .. } => "reprompt",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }
}

/// Event pushed to streaming consumers. The channel is a finite, ordered,
/// single-pass sequence: zero or more `Trace` events, then exactly one
/// `Done`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    Trace(TraceEntry),
    Done { result: crate::executor::AgentOutcome },
}

impl AgentEvent {
    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Trace(entry) => entry.kind(),
            Self::Done { .. } => "done",
        }
    }
}
