//! Error types for the DocuAgent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all DocuAgent operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generator errors ---
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Request validation ---
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the text-generation capability.
///
/// The executor treats every one of these as recoverable: a timeout escalates
/// to the error path (partial result), everything else degrades to the
/// bounded reprompt / forced-synthesis machinery.
#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Backend request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Generator returned an empty response")]
    Empty,

    #[error("Generator not configured: {0}")]
    NotConfigured(String),
}

/// Failures of the retrieval tools (`search_docs` / `open_citation`).
///
/// Tool failures consume budget and become notes fed back into the next
/// prompt; they never abort a run on their own.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Whether this failure indicates the backend itself is down, as opposed
    /// to a bad request. Repeated unavailability forces synthesis.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
