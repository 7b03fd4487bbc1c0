//! OpenAI-compatible generator implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! and any endpoint exposing `/v1/chat/completions`.

use async_trait::async_trait;
use docuagent_core::error::GeneratorError;
use docuagent_core::generator::{GenerateRequest, Generator};
use serde::Deserialize;
use tracing::{debug, warn};

/// A generator backed by an OpenAI-compatible chat-completions endpoint.
///
/// Every call sends a single user message containing the full prompt; the
/// agent loop carries its own context, so there is no conversation history
/// at this layer.
pub struct OpenAiCompatGenerator {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatGenerator {
    /// Create a new OpenAI-compatible generator.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // No client-level timeout. Each request carries its own deadline,
        // applied per call via reqwest's request timeout.
        let client = reqwest::Client::new();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: "llama3.2".into(),
            client,
        }
    }

    /// Create an OpenAI generator (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama generator (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Set the model passed on every request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let timeout_secs = request.timeout.as_secs();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(generator = %self.name, model = %self.model, timeout_secs, "Sending generation request");

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout { timeout_secs }
                } else {
                    GeneratorError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(GeneratorError::Api {
                status_code: status,
                message: "Rate limited".into(),
            });
        }

        if status == 401 || status == 403 {
            return Err(GeneratorError::Api {
                status_code: status,
                message: "Invalid API key or insufficient permissions".into(),
            });
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Backend returned error");
            return Err(GeneratorError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout { timeout_secs }
            } else {
                GeneratorError::Api {
                    status_code: 200,
                    message: format!("Failed to parse response: {e}"),
                }
            }
        })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(GeneratorError::Empty);
        }

        Ok(content)
    }

    async fn health_check(&self) -> Result<bool, GeneratorError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Wire types (OpenAI API shapes) ---

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let generator = OpenAiCompatGenerator::new("test", "http://localhost:8000/v1/", "key");
        assert_eq!(generator.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn ollama_defaults() {
        let generator = OpenAiCompatGenerator::ollama(None).with_model("qwen2.5");
        assert_eq!(generator.name(), "ollama");
        assert_eq!(generator.base_url, "http://localhost:11434/v1");
        assert_eq!(generator.model, "qwen2.5");
    }

    #[test]
    fn parses_api_response() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("hello")
        );
    }
}
