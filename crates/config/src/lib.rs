//! Configuration loading and validation for DocuAgent.
//!
//! Loads configuration from `~/.docuagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.docuagent/config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Text-generation backend settings
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Gateway HTTP settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Which backend to talk to: "ollama" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// API key, if the backend requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature for structured-output calls.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Wall-clock budget for one agent run.
    #[serde(default = "default_wall_clock_secs")]
    pub wall_clock_secs: u64,

    /// Whether API responses include the execution trace by default.
    #[serde(default = "default_true")]
    pub return_trace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_wall_clock_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            wall_clock_secs: default_wall_clock_secs(),
            return_trace: default_true(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("generator", &self.generator)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.generator.api_key.is_none() {
            config.generator.api_key = std::env::var("DOCUAGENT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(base_url) = std::env::var("DOCUAGENT_BASE_URL") {
            config.generator.base_url = base_url;
        }
        if let Ok(model) = std::env::var("DOCUAGENT_MODEL") {
            config.generator.model = model;
        }
        if let Ok(provider) = std::env::var("DOCUAGENT_PROVIDER") {
            config.generator.provider = provider;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".docuagent")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(ConfigError::ValidationError(
                "generator.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.generator.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generator.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.agent.wall_clock_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.wall_clock_secs must be greater than 0".into(),
            ));
        }
        if self.generator.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "generator.base_url cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

#[cfg(windows)]
fn dirs_home() -> PathBuf {
    std::env::var("USERPROFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(not(windows))]
fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.agent.wall_clock_secs, 60);
        assert!(config.agent.return_trace);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.generator.model, default_model());
    }

    #[test]
    fn parses_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[generator]\nmodel = \"qwen2.5\"\n\n[gateway]\nport = 9000"
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.generator.model, "qwen2.5");
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.agent.wall_clock_secs, 60);
    }

    #[test]
    fn rejects_bad_temperature() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[generator]\ntemperature = 5.0").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.generator.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }
}
