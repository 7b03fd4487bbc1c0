//! Generator trait — the abstraction over text-generation backends.
//!
//! A Generator knows how to turn a prompt into completion text. The executor
//! calls it for planning, for every loop iteration, and for forced synthesis,
//! always under a timeout — the backend is assumed unreliable.
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, Ollama, vLLM,
//! OpenRouter), scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GeneratorError;

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The full prompt text. The executor assembles this per iteration;
    /// the generator never sees conversation history beyond it.
    pub prompt: String,

    /// Temperature (low values for predictable structured output).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-call timeout. Implementations must not block past this.
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl GenerateRequest {
    /// Create a request with the default low temperature and timeout.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The core Generator trait.
///
/// Every text-generation backend implements this. The executor calls
/// `generate()` without knowing which backend is in use.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this generator (e.g., "ollama", "openai").
    fn name(&self) -> &str;

    /// Produce completion text for the given request.
    ///
    /// Must return `GeneratorError::Timeout` rather than exceeding the
    /// request's timeout, and `GeneratorError::Empty` for blank output.
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<String, GeneratorError>;

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, GeneratorError> {
        Ok(true)
    }
}
