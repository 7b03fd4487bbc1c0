//! Text-generation backends for DocuAgent.
//!
//! Everything the agent needs from a backend is the [`Generator`] trait in
//! docuagent-core; this crate supplies the real implementations. Most
//! backends expose an OpenAI-compatible `/v1/chat/completions` endpoint,
//! so one provider type covers OpenAI, Ollama, vLLM, OpenRouter, and
//! friends.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatGenerator;

use docuagent_config::GeneratorConfig;
use docuagent_core::error::GeneratorError;
use docuagent_core::generator::Generator;
use std::sync::Arc;

/// Build a generator from configuration.
pub fn from_config(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, GeneratorError> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(
            OpenAiCompatGenerator::ollama(Some(&config.base_url)).with_model(&config.model),
        )),
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                GeneratorError::NotConfigured(
                    "openai provider requires an API key (set DOCUAGENT_API_KEY)".into(),
                )
            })?;
            Ok(Arc::new(
                OpenAiCompatGenerator::openai(api_key).with_model(&config.model),
            ))
        }
        other => Ok(Arc::new(
            OpenAiCompatGenerator::new(
                other,
                &config.base_url,
                config.api_key.clone().unwrap_or_default(),
            )
            .with_model(&config.model),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_without_key_is_not_configured() {
        let config = GeneratorConfig {
            provider: "openai".into(),
            api_key: None,
            ..Default::default()
        };
        let err = from_config(&config).err();
        assert!(matches!(err, Some(GeneratorError::NotConfigured(_))));
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = GeneratorConfig::default();
        let generator = from_config(&config).unwrap();
        assert_eq!(generator.name(), "ollama");
    }
}
