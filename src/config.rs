//! Configuration for specgenie.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{Result, SpecGenieError};
use crate::llm::BackendKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials and model selection for one LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider API
    pub api_base: String,

    /// API key for authentication
    #[serde(default)]
    pub api_key: String,

    /// Model name (e.g., "gpt-4o", "gemini-pro")
    pub model: String,
}

impl ProviderConfig {
    fn gemini() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            model: "gemini-pro".to_string(),
        }
    }

    fn openai() -> Self {
        Self {
            api_base: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
        }
    }
}

/// Token budgets applied to every chat session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cumulative tokens a session may hold before its history is cleared.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens that may be exchanged per minute before the session waits.
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: usize,
}

fn default_max_tokens() -> usize {
    20_000
}

fn default_tokens_per_minute() -> usize {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokens_per_minute: default_tokens_per_minute(),
        }
    }
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per message, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Base wait in seconds, multiplied by the backoff factor per attempt.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: f64,
}

fn default_attempts() -> u32 {
    3
}

fn default_wait_secs() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            wait_secs: default_wait_secs(),
        }
    }
}

/// Longest single wait between retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

impl RetryConfig {
    /// Wait before retrying after `attempt` (0-based) with the given growth factor.
    ///
    /// Capped at [`MAX_BACKOFF`]; a negative or NaN base wait gives no wait.
    pub fn backoff(&self, factor: u32, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.wait_secs * f64::from(factor).powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs)
            .map(|wait| wait.min(MAX_BACKOFF))
            .unwrap_or(MAX_BACKOFF)
    }
}

/// Web search settings for context gathering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Google Custom Search API key
    #[serde(default)]
    pub api_key: String,

    /// Custom search engine id (`cx`)
    #[serde(default)]
    pub engine_id: String,

    /// Maximum result pages requested per product before giving up
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Timeout for fetching one result page, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_max_pages() -> usize {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            engine_id: String::new(),
            max_pages: default_max_pages(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gemini-style backend
    pub gemini: ProviderConfig,
    /// ChatGPT-style backend
    pub openai: ProviderConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    /// Address the HTTP server binds to
    pub addr: String,
    /// Catalog file with categories, prompts and ground truth
    pub catalog: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: ProviderConfig::gemini(),
            openai: ProviderConfig::openai(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            search: SearchConfig::default(),
            addr: "127.0.0.1:8000".to_string(),
            catalog: PathBuf::from("data/catalog.yaml"),
        }
    }
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    gemini: Option<ProviderFileSection>,
    openai: Option<ProviderFileSection>,
    session: Option<SessionConfig>,
    retry: Option<RetryConfig>,
    search: Option<SearchConfig>,
    server: Option<ServerFileSection>,
    catalog: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ProviderFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerFileSection {
    addr: Option<String>,
}

impl ProviderFileSection {
    fn apply(self, target: &mut ProviderConfig) {
        if let Some(api_base) = self.api_base {
            target.api_base = api_base;
        }
        if let Some(api_key) = self.api_key {
            target.api_key = api_key;
        }
        if let Some(model) = self.model {
            target.model = model;
        }
    }
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GEMINI_API_KEY, OPENAI_API_KEY, SEARCH_API_KEY, ...)
    /// 2. Config file (~/.config/specgenie/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        let set = |key: &str, target: &mut String| {
            if let Ok(value) = env::var(key) {
                *target = value;
            }
        };

        set("GEMINI_API_KEY", &mut self.gemini.api_key);
        set("GEMINI_MODEL", &mut self.gemini.model);
        set("OPENAI_API_KEY", &mut self.openai.api_key);
        set("OPENAI_MODEL", &mut self.openai.model);
        set("OPENAI_API_BASE", &mut self.openai.api_base);
        set("SEARCH_API_KEY", &mut self.search.api_key);
        set("SEARCH_ENGINE_ID", &mut self.search.engine_id);
        set("SPECGENIE_ADDR", &mut self.addr);

        if let Ok(attempts) = env::var("SPECGENIE_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                self.retry.attempts = attempts;
            }
        }

        if let Ok(wait) = env::var("SPECGENIE_WAIT_SECS") {
            if let Ok(wait) = wait.parse() {
                self.retry.wait_secs = wait;
            }
        }

        if let Ok(catalog) = env::var("SPECGENIE_CATALOG") {
            self.catalog = PathBuf::from(catalog);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SpecGenieError::io(path, e))?;
        Self::from_yaml(&content)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| SpecGenieError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(gemini) = file_config.gemini {
            gemini.apply(&mut config.gemini);
        }
        if let Some(openai) = file_config.openai {
            openai.apply(&mut config.openai);
        }
        if let Some(session) = file_config.session {
            config.session = session;
        }
        if let Some(retry) = file_config.retry {
            config.retry = retry;
        }
        if let Some(search) = file_config.search {
            config.search = search;
        }
        if let Some(addr) = file_config.server.and_then(|s| s.addr) {
            config.addr = addr;
        }
        if let Some(catalog) = file_config.catalog {
            config.catalog = catalog;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "specgenie")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Provider settings for a backend kind.
    pub fn provider(&self, kind: BackendKind) -> &ProviderConfig {
        match kind {
            BackendKind::Gemini => &self.gemini,
            BackendKind::Gpt => &self.openai,
        }
    }

    /// Validate the settings shared by every run.
    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            return Err(SpecGenieError::InvalidConfig(
                "retry.attempts must be at least 1".to_string(),
            ));
        }

        if !self.retry.wait_secs.is_finite() || self.retry.wait_secs < 0.0 {
            return Err(SpecGenieError::InvalidConfig(format!(
                "retry.wait_secs must be a non-negative number of seconds, got {}",
                self.retry.wait_secs
            )));
        }

        if self.session.max_tokens == 0 {
            return Err(SpecGenieError::InvalidConfig(
                "session.max_tokens must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that the given backend can be reached.
    pub fn validate_for(&self, kind: BackendKind) -> Result<()> {
        self.validate()?;

        let provider = self.provider(kind);
        if provider.api_key.is_empty() {
            let var = match kind {
                BackendKind::Gemini => "GEMINI_API_KEY",
                BackendKind::Gpt => "OPENAI_API_KEY",
            };
            return Err(SpecGenieError::Config(format!(
                "API key for '{}' is required. Set {} environment variable or add to config file.",
                kind, var
            )));
        }

        if provider.model.is_empty() {
            return Err(SpecGenieError::Config(format!(
                "Model for '{}' is required.",
                kind
            )));
        }

        Ok(())
    }

    /// Validate that web search credentials are present.
    pub fn validate_search(&self) -> Result<()> {
        if self.search.api_key.is_empty() || self.search.engine_id.is_empty() {
            return Err(SpecGenieError::Config(
                "Web search requires SEARCH_API_KEY and SEARCH_ENGINE_ID.".to_string(),
            ));
        }
        Ok(())
    }
}
