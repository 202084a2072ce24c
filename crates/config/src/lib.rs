//! Configuration loading, validation, and management for ragloom.
//!
//! Loads configuration from `~/.ragloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest context budget that can still hold the no-evidence marker and a
/// usable source.
pub const MIN_CONTEXT_CHARS: usize = 256;

/// The root configuration structure.
///
/// Maps directly to `~/.ragloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default generation provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Retrieval backend endpoints
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Deep-scrape settings for web results
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Context budget and orchestration limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per-stage call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.3
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("providers", &self.providers)
            .field("retrieval", &self.retrieval)
            .field("scraper", &self.scraper)
            .field("orchestrator", &self.orchestrator)
            .field("timeouts", &self.timeouts)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// SearXNG instance used for web search
    #[serde(default = "default_searxng_url")]
    pub searxng_url: String,

    /// SearXNG categories to search
    #[serde(default = "default_search_categories")]
    pub search_categories: Vec<String>,

    /// Qdrant REST endpoint used for collection search
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_api_key: Option<String>,

    /// Provider used to embed queries for vector search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// User agent for outbound search and scrape requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_searxng_url() -> String {
    "http://localhost:8080".into()
}
fn default_search_categories() -> Vec<String> {
    vec!["general".into()]
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_user_agent() -> String {
    format!("ragloom/{}", env!("CARGO_PKG_VERSION"))
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("searxng_url", &self.searxng_url)
            .field("search_categories", &self.search_categories)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_api_key", &redact(&self.qdrant_api_key))
            .field("embedding_provider", &self.embedding_provider)
            .field("embedding_model", &self.embedding_model)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            searxng_url: default_searxng_url(),
            search_categories: default_search_categories(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key: None,
            embedding_provider: None,
            embedding_model: default_embedding_model(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Number of top web results to fetch in full
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,

    /// Concurrent page fetches
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,

    /// Page text beyond this many characters is truncated
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Scraped text kept per page, cut at a sentence boundary
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

fn default_max_urls() -> usize {
    5
}
fn default_max_workers() -> usize {
    3
}
fn default_scrape_timeout() -> u64 {
    10
}
fn default_max_content_length() -> usize {
    100_000
}
fn default_max_snippet_chars() -> usize {
    2_000
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_urls: default_max_urls(),
            max_workers: default_max_workers(),
            timeout_secs: default_scrape_timeout(),
            max_content_length: default_max_content_length(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default evidence cap when a query doesn't set one
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Character ceiling for the rendered context block
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Truncated snippets shorter than this are dropped instead
    #[serde(default = "default_min_snippet_chars")]
    pub min_snippet_chars: usize,

    /// Evidence scoring below this everywhere forces an insufficient-context answer
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Upper bound on concurrent sub-query retrievals
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_decomposition_max_tokens")]
    pub decomposition_max_tokens: u32,

    #[serde(default = "default_synthesis_max_tokens")]
    pub synthesis_max_tokens: u32,
}

fn default_max_results() -> usize {
    4
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_min_snippet_chars() -> usize {
    80
}
fn default_confidence_floor() -> f32 {
    0.2
}
fn default_max_concurrency() -> usize {
    4
}
fn default_decomposition_max_tokens() -> u32 {
    500
}
fn default_synthesis_max_tokens() -> u32 {
    1500
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_context_chars: default_max_context_chars(),
            min_snippet_chars: default_min_snippet_chars(),
            confidence_floor: default_confidence_floor(),
            max_concurrency: default_max_concurrency(),
            decomposition_max_tokens: default_decomposition_max_tokens(),
            synthesis_max_tokens: default_synthesis_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,

    #[serde(default = "default_decomposition_secs")]
    pub decomposition_secs: u64,

    #[serde(default = "default_synthesis_secs")]
    pub synthesis_secs: u64,
}

fn default_retrieval_secs() -> u64 {
    15
}
fn default_decomposition_secs() -> u64 {
    60
}
fn default_synthesis_secs() -> u64 {
    120
}

impl TimeoutConfig {
    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }

    pub fn decomposition(&self) -> Duration {
        Duration::from_secs(self.decomposition_secs)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_secs(self.synthesis_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            retrieval_secs: default_retrieval_secs(),
            decomposition_secs: default_decomposition_secs(),
            synthesis_secs: default_synthesis_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS; empty means any
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8400
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragloom/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `RAGLOOM_API_KEY`, then `OPENAI_API_KEY` (generic key)
    /// - `ANTHROPIC_API_KEY` (anthropic provider key)
    /// - `RAGLOOM_PROVIDER`, `RAGLOOM_MODEL`
    /// - `SEARXNG_URL`, `QDRANT_URL`, `QDRANT_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = env("RAGLOOM_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        }

        if let Some(key) = env("ANTHROPIC_API_KEY") {
            let entry = self.providers.entry("anthropic".into()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }

        if let Some(provider) = env("RAGLOOM_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = env("RAGLOOM_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = env("SEARXNG_URL") {
            self.retrieval.searxng_url = url;
        }
        if let Some(url) = env("QDRANT_URL") {
            self.retrieval.qdrant_url = url;
        }
        if let Some(key) = env("QDRANT_API_KEY") {
            self.retrieval.qdrant_api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let o = &self.orchestrator;
        if o.max_results == 0 || o.max_results > 10 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_results must be between 1 and 10".into(),
            ));
        }
        if o.max_context_chars < MIN_CONTEXT_CHARS {
            return Err(ConfigError::ValidationError(format!(
                "orchestrator.max_context_chars must be at least {MIN_CONTEXT_CHARS}"
            )));
        }
        if o.min_snippet_chars >= o.max_context_chars {
            return Err(ConfigError::ValidationError(
                "orchestrator.min_snippet_chars must be smaller than max_context_chars".into(),
            ));
        }
        if !(0.0..=1.0).contains(&o.confidence_floor) {
            return Err(ConfigError::ValidationError(
                "orchestrator.confidence_floor must be between 0.0 and 1.0".into(),
            ));
        }
        if o.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_concurrency must be > 0".into(),
            ));
        }

        let t = &self.timeouts;
        if t.retrieval_secs == 0 || t.decomposition_secs == 0 || t.synthesis_secs == 0 {
            return Err(ConfigError::ValidationError("timeouts must be > 0 seconds".into()));
        }

        if self.scraper.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "scraper.max_workers must be > 0".into(),
            ));
        }

        if self.scraper.max_snippet_chars < self.orchestrator.min_snippet_chars {
            return Err(ConfigError::ValidationError(
                "scraper.max_snippet_chars must be >= orchestrator.min_snippet_chars".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// A copy safe to print: every secret replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]".to_string());
        let mut copy = self.clone();
        copy.api_key = mask(&self.api_key);
        copy.retrieval.qdrant_api_key = mask(&self.retrieval.qdrant_api_key);
        for provider in copy.providers.values_mut() {
            provider.api_key = mask(&provider.api_key);
        }
        copy
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml().unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            providers: HashMap::new(),
            retrieval: RetrievalConfig::default(),
            scraper: ScraperConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            timeouts: TimeoutConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.orchestrator.max_results, 4);
        assert_eq!(config.scraper.max_urls, 5);
        assert_eq!(config.gateway.port, 8400);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.retrieval.qdrant_url, config.retrieval.qdrant_url);
        assert_eq!(parsed.timeouts.synthesis_secs, config.timeouts.synthesis_secs);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiny_context_budget_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_context_chars = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_context_chars"));
    }

    #[test]
    fn confidence_floor_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.confidence_floor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.timeouts.retrieval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn scraped_snippet_cap_below_minimum_rejected() {
        let mut config = AppConfig::default();
        assert_eq!(config.scraper.max_snippet_chars, 2_000);
        config.scraper.max_snippet_chars = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_provider = "anthropic"
default_model = "claude-sonnet-4-20250514"

[orchestrator]
max_context_chars = 8000

[timeouts]
synthesis_secs = 30
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.orchestrator.max_context_chars, 8000);
        assert_eq!(config.orchestrator.min_snippet_chars, 80);
        assert_eq!(config.timeouts.synthesis(), Duration::from_secs(30));
        assert_eq!(config.timeouts.retrieval(), Duration::from_secs(15));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_provider = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "OPENAI_API_KEY" => Some("sk-env".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            "SEARXNG_URL" => Some("http://searxng:8080".into()),
            "RAGLOOM_MODEL" => Some("gpt-4o".into()),
            _ => None,
        });

        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.retrieval.searxng_url, "http://searxng:8080");
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(
            config.providers["anthropic"].api_key.as_deref(),
            Some("sk-ant")
        );
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|key| (key == "RAGLOOM_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_and_redacted_hide_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant-secret".into()),
                ..ProviderConfig::default()
            },
        );

        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("sk-ant-secret"));

        let printed = config.redacted().to_toml().unwrap();
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("[orchestrator]"));
        assert!(toml_str.contains("8400"));
    }
}
