//! Hard budgets for a single agent run.
//!
//! These are compile-time constants rather than configuration: every bound
//! here is a termination or safety guarantee, and making them tunable at
//! runtime would make "the loop always halts" a matter of deployment rather
//! than construction.

/// Maximum tool invocations per run. Exhausted budget forces synthesis.
pub const MAX_TOOL_CALLS: usize = 5;

/// Maximum loop iterations per run, counting every generator round trip.
pub const MAX_ITERATIONS: usize = 10;

/// Maximum validation-failure reprompts before accepting the answer as-is.
pub const MAX_REPROMPTS: usize = 3;

/// Questions longer than this are rejected before planning.
pub const MAX_QUESTION_LENGTH: usize = 1000;

/// How many of the most recently opened citations appear verbatim in the
/// iteration prompt. Older citations remain in state for grounding.
pub const CITATION_WINDOW: usize = 3;

/// Wall-clock budget for an entire run, planning through grounding.
pub const WALL_CLOCK_BUDGET_SECS: u64 = 60;

/// Per-call timeout for answer generation.
pub const GENERATION_TIMEOUT_SECS: u64 = 30;

/// Token cap for iteration and synthesis responses.
pub const ANSWER_MAX_TOKENS: u32 = 600;

/// Token cap for the planning call. Plans are short by construction.
pub const PLAN_MAX_TOKENS: u32 = 300;

/// Consecutive malformed generator outputs tolerated before forcing synthesis.
pub const MAX_MALFORMED_STREAK: usize = 2;

/// Consecutive tool-unavailable failures tolerated before forcing synthesis.
pub const MAX_UNAVAILABLE_STREAK: usize = 2;
