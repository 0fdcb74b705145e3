//! TOML-based configuration for ares-research
//!
//! Every field has a serde default, so an empty `research.toml` (or none at
//! all) yields a working local setup against Ollama. Secrets are never stored
//! in the file: the OpenAI key is read from the environment variable named by
//! `llm.api_key_env`.
//!
//! The loaded [`ResearchConfig`] is turned into a [`ResearchLimits`] value per
//! run, after request overrides are applied. Limits are passed by value into
//! the orchestrator; nothing here is process-global.

use crate::llm::{Provider, RetryPolicy};
use crate::types::{AppError, CitationStyle, ResearchRequest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from research.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub research: LoopConfig,

    #[serde(default)]
    pub citation: CitationConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Defaults to the provider's usual endpoint
    pub base_url: Option<String>,

    /// Defaults to a small general-purpose model for the provider
    pub model: Option<String>,

    /// Environment variable holding the API key (openai only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            model: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.provider {
            ProviderKind::Ollama => "http://localhost:11434".to_string(),
            ProviderKind::OpenAI => "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider {
            ProviderKind::Ollama => "llama3.2".to_string(),
            ProviderKind::OpenAI => "gpt-4o-mini".to_string(),
        })
    }
}

// ============= Search Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Retries after the first failed call to the same query
    #[serde(default = "default_search_retries")]
    pub max_retries: u32,

    /// First backoff; doubles per retry
    #[serde(default = "default_search_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_results() -> usize {
    10
}

fn default_search_retries() -> u32 {
    3
}

fn default_search_backoff_ms() -> u64 {
    1000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_retries: default_search_retries(),
            retry_backoff_ms: default_search_backoff_ms(),
        }
    }
}

// ============= Memory Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Process-local, gone when the process exits
    Memory,
    /// Single JSON document on disk
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,

    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("./data/research_memory.json")
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            path: default_memory_path(),
        }
    }
}

// ============= Research Loop Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_subagents")]
    pub max_subagents: usize,

    /// Wall-clock ceiling for the research loop, from submission
    #[serde(default = "default_research_timeout")]
    pub research_timeout_secs: u64,

    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,

    /// Completeness score (0-100) at or above which the loop may stop
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: u8,

    #[serde(default = "default_completion_retries")]
    pub completion_retries: u32,

    #[serde(default = "default_completion_backoff_ms")]
    pub completion_backoff_ms: u64,

    /// Past research records offered to the planner as context
    #[serde(default = "default_similar_context")]
    pub similar_context: usize,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_subagents() -> usize {
    4
}

fn default_research_timeout() -> u64 {
    300
}

fn default_worker_timeout() -> u64 {
    60
}

fn default_completeness_threshold() -> u8 {
    80
}

fn default_completion_retries() -> u32 {
    2
}

fn default_completion_backoff_ms() -> u64 {
    500
}

fn default_similar_context() -> usize {
    3
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_subagents: default_max_subagents(),
            research_timeout_secs: default_research_timeout(),
            worker_timeout_secs: default_worker_timeout(),
            completeness_threshold: default_completeness_threshold(),
            completion_retries: default_completion_retries(),
            completion_backoff_ms: default_completion_backoff_ms(),
            similar_context: default_similar_context(),
        }
    }
}

// ============= Citation Configuration =============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationConfig {
    #[serde(default)]
    pub style: CitationStyle,
}

// ============= Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl ResearchConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: ResearchConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(_)) => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Validate the configuration for internal consistency and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        let research = &self.research;

        if research.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_iterations must be at least 1".to_string(),
            ));
        }

        if research.max_subagents == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_subagents must be at least 1".to_string(),
            ));
        }

        if research.worker_timeout_secs == 0
            || research.worker_timeout_secs >= research.research_timeout_secs
        {
            return Err(ConfigError::ValidationError(format!(
                "research.worker_timeout_secs ({}) must be non-zero and below research_timeout_secs ({})",
                research.worker_timeout_secs, research.research_timeout_secs
            )));
        }

        if research.completeness_threshold > 100 {
            return Err(ConfigError::ValidationError(format!(
                "research.completeness_threshold must be 0-100, got {}",
                research.completeness_threshold
            )));
        }

        if self.search.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "search.max_results must be at least 1".to_string(),
            ));
        }

        if self.llm.provider == ProviderKind::OpenAI {
            self.validate_env_var(&self.llm.api_key_env)?;
        }

        Ok(())
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Build the completion provider described by `[llm]`
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        match self.llm.provider {
            ProviderKind::Ollama => Ok(Provider::Ollama {
                base_url: self.llm.base_url(),
                model: self.llm.model(),
            }),
            ProviderKind::OpenAI => {
                let api_key = self
                    .resolve_env(&self.llm.api_key_env)
                    .ok_or_else(|| ConfigError::MissingEnvVar(self.llm.api_key_env.clone()))?;
                Ok(Provider::OpenAI {
                    api_key,
                    api_base: self.llm.base_url(),
                    model: self.llm.model(),
                })
            }
        }
    }

    /// Limits for a run without request overrides
    pub fn limits(&self) -> ResearchLimits {
        let research = &self.research;
        ResearchLimits {
            max_iterations: research.max_iterations,
            max_subagents: research.max_subagents,
            research_timeout: Duration::from_secs(research.research_timeout_secs),
            worker_timeout: Duration::from_secs(research.worker_timeout_secs),
            completeness_threshold: research.completeness_threshold,
            completion_retry: RetryPolicy {
                max_retries: research.completion_retries,
                base_backoff: Duration::from_millis(research.completion_backoff_ms),
            },
            search_retry: RetryPolicy {
                max_retries: self.search.max_retries,
                base_backoff: Duration::from_millis(self.search.retry_backoff_ms),
            },
            max_search_results: self.search.max_results,
            similar_context: research.similar_context,
            temperature: self.llm.temperature,
            citation_style: self.citation.style,
        }
    }
}

// ============= Per-run Limits =============

/// Immutable limits for a single research run.
///
/// Built from the config, then narrowed by request overrides. Each run owns
/// its copy, so concurrent runs with different limits never interfere.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchLimits {
    pub max_iterations: u32,
    pub max_subagents: usize,
    pub research_timeout: Duration,
    pub worker_timeout: Duration,
    pub completeness_threshold: u8,
    pub completion_retry: RetryPolicy,
    pub search_retry: RetryPolicy,
    pub max_search_results: usize,
    pub similar_context: usize,
    pub temperature: f32,
    pub citation_style: CitationStyle,
}

impl Default for ResearchLimits {
    fn default() -> Self {
        ResearchConfig::default().limits()
    }
}

impl ResearchLimits {
    /// Apply the per-request `max_iterations` / `max_subagents` overrides.
    pub fn with_request(mut self, request: &ResearchRequest) -> Result<Self, AppError> {
        if let Some(max_iterations) = request.max_iterations {
            if max_iterations == 0 {
                return Err(AppError::InvalidInput(
                    "max_iterations must be at least 1".to_string(),
                ));
            }
            self.max_iterations = max_iterations;
        }

        if let Some(max_subagents) = request.max_subagents {
            if max_subagents == 0 {
                return Err(AppError::InvalidInput(
                    "max_subagents must be at least 1".to_string(),
                ));
            }
            self.max_subagents = max_subagents;
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> String {
        r#"
log_level = "debug"

[llm]
provider = "ollama"
base_url = "http://gpu-box:11434"
model = "granite4:tiny-h"
temperature = 0.2

[search]
max_results = 5
max_retries = 1
retry_backoff_ms = 10

[memory]
backend = "memory"

[research]
max_iterations = 2
max_subagents = 3
research_timeout_secs = 120
worker_timeout_secs = 30
completeness_threshold = 75

[citation]
style = "numeric"
"#
        .to_string()
    }

    #[test]
    fn test_parse_config() {
        let config: ResearchConfig =
            toml::from_str(&create_test_config()).expect("Failed to parse config");

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.llm.model(), "granite4:tiny-h");
        assert_eq!(config.memory.backend, MemoryBackend::Memory);
        assert_eq!(config.research.max_subagents, 3);
        assert_eq!(config.citation.style, CitationStyle::Numeric);
        // unset fields keep their defaults
        assert_eq!(config.research.similar_context, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ResearchConfig = toml::from_str("").unwrap();

        assert_eq!(config.research.max_iterations, 3);
        assert_eq!(config.research.max_subagents, 4);
        assert_eq!(config.research.research_timeout_secs, 300);
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.citation.style, CitationStyle::Markdown);
        assert_eq!(config.llm.base_url(), "http://localhost:11434");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_iterations() {
        let config: ResearchConfig = toml::from_str("[research]\nmax_iterations = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_worker_timeout_below_global() {
        let content = r#"
[research]
research_timeout_secs = 30
worker_timeout_secs = 30
"#;
        let config: ResearchConfig = toml::from_str(content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_openai_requires_key_env() {
        let content = r#"
[llm]
provider = "openai"
api_key_env = "ARES_RESEARCH_TEST_UNSET_KEY"
"#;
        let config: ResearchConfig = toml::from_str(content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEnvVar(name)) if name == "ARES_RESEARCH_TEST_UNSET_KEY"
        ));
        assert!(config.provider().is_err());
    }

    #[test]
    fn test_openai_provider_resolves_key() {
        std::env::set_var("ARES_RESEARCH_TEST_OPENAI_KEY", "sk-test");
        let content = r#"
[llm]
provider = "openai"
api_key_env = "ARES_RESEARCH_TEST_OPENAI_KEY"
"#;
        let config: ResearchConfig = toml::from_str(content).unwrap();

        match config.provider().unwrap() {
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => {
                assert_eq!(api_key, "sk-test");
                assert_eq!(api_base, "https://api.openai.com/v1");
                assert_eq!(model, "gpt-4o-mini");
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        fs::write(&path, create_test_config()).unwrap();

        let config = ResearchConfig::load(&path).unwrap();
        assert_eq!(config.search.max_results, 5);

        let missing = ResearchConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

        let fallback = ResearchConfig::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(fallback.research.max_iterations, 3);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        fs::write(&path, "[research\nmax_iterations = ").unwrap();

        assert!(matches!(
            ResearchConfig::load(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_limits_and_request_overrides() {
        let config: ResearchConfig = toml::from_str(&create_test_config()).unwrap();
        let limits = config.limits();
        assert_eq!(limits.max_iterations, 2);
        assert_eq!(limits.worker_timeout, Duration::from_secs(30));
        assert_eq!(limits.search_retry.max_retries, 1);
        assert_eq!(limits.citation_style, CitationStyle::Numeric);

        let request = ResearchRequest {
            max_iterations: Some(1),
            max_subagents: Some(2),
            ..ResearchRequest::new("q")
        };
        let narrowed = limits.clone().with_request(&request).unwrap();
        assert_eq!(narrowed.max_iterations, 1);
        assert_eq!(narrowed.max_subagents, 2);

        let zero = ResearchRequest {
            max_subagents: Some(0),
            ..ResearchRequest::new("q")
        };
        assert!(matches!(
            limits.with_request(&zero),
            Err(AppError::InvalidInput(_))
        ));
    }
}
