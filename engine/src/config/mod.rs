//! Configuration management
//!
//! This module handles loading, validation, and management of the navigator
//! configuration. Configuration is stored in TOML format at
//! ~/.navigator/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Provider endpoints, call timeout and one model binding per role
//! - **browser**: WebDriver endpoint and action timeout
//! - **memory**: Retrieval limits and the pseudo-embedding dimensionality
//! - **navigator**: Orchestration knobs (snapshot budget, history window, retries)
//!
//! # Environment Overrides
//!
//! After the file is parsed, `NAVIGATOR_OLLAMA_URL` and
//! `NAVIGATOR_<ROLE>_MODEL` (e.g. `NAVIGATOR_CODING_MODEL`) replace the
//! corresponding values.
//!
//! # Examples
//!
//! ```no_run
//! use navigator_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Coding model: {}", config.llm.roles.coding.model);
//! # Ok(())
//! # }
//! ```

use crate::llm::ModelRole;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Browser driver configuration
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Semantic memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Orchestration settings
    #[serde(default)]
    pub navigator: NavigatorConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Which provider implementation serves a role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAI,
}

/// Provider + model bound to one gateway role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleConfig {
    #[serde(default = "default_provider_kind")]
    pub provider: ProviderKind,

    pub model: String,

    /// Optional model on the same provider tried when the primary is unreachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

impl RoleConfig {
    fn ollama(model: &str) -> Self {
        Self {
            provider: ProviderKind::Ollama,
            model: model.to_string(),
            fallback_model: None,
        }
    }
}

/// One binding per gateway role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolesConfig {
    #[serde(default = "default_general_role")]
    pub general: RoleConfig,

    #[serde(default = "default_coding_role")]
    pub coding: RoleConfig,

    #[serde(default = "default_reasoning_role")]
    pub reasoning: RoleConfig,

    #[serde(default = "default_embedding_role")]
    pub embedding: RoleConfig,
}

impl RolesConfig {
    /// Binding for a role
    pub fn get(&self, role: ModelRole) -> &RoleConfig {
        match role {
            ModelRole::General => &self.general,
            ModelRole::Coding => &self.coding,
            ModelRole::Reasoning => &self.reasoning,
            ModelRole::Embedding => &self.embedding,
        }
    }

    fn get_mut(&mut self, role: ModelRole) -> &mut RoleConfig {
        match role {
            ModelRole::General => &mut self.general,
            ModelRole::Coding => &mut self.coding,
            ModelRole::Reasoning => &mut self.reasoning,
            ModelRole::Embedding => &mut self.embedding,
        }
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            general: default_general_role(),
            coding: default_coding_role(),
            reasoning: default_reasoning_role(),
            embedding: default_embedding_role(),
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL for the Ollama API
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Timeout applied to every gateway call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Role bindings
    #[serde(default)]
    pub roles: RolesConfig,
}

impl LLMConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            request_timeout_secs: default_request_timeout(),
            openai: OpenAIConfig::default(),
            roles: RolesConfig::default(),
        }
    }
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key_env: default_openai_key_env(),
        }
    }
}

/// Browser driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// W3C WebDriver endpoint (chromedriver, geckodriver, selenium)
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Browser requested in the session capabilities
    #[serde(default = "default_browser_name")]
    pub browser_name: String,

    /// Run the browser without a window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Timeout for executing one action script
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

impl BrowserConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            browser_name: default_browser_name(),
            headless: true,
            action_timeout_secs: default_action_timeout(),
        }
    }
}

/// Semantic memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Records retrieved before planning
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Records retrieved before summarizing
    #[serde(default = "default_summary_search_limit")]
    pub summary_search_limit: usize,

    /// Dimensionality of the hash-based fallback embedding
    #[serde(default = "default_fallback_dimensions")]
    pub fallback_dimensions: usize,

    /// Persist records to the SQLite database
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            summary_search_limit: default_summary_search_limit(),
            fallback_dimensions: default_fallback_dimensions(),
            persist: true,
        }
    }
}

/// Orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorConfig {
    /// Character budget for the page snapshot kept in the browsing context
    #[serde(default = "default_max_snapshot_chars")]
    pub max_snapshot_chars: usize,

    /// Prior steps shown to the coder role (1..=3)
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Steps kept from a plan
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,

    /// Ask the coder role to fix a failed script once before reporting failure
    #[serde(default = "default_true")]
    pub fix_retry: bool,

    /// Analyze the page after each successful step
    #[serde(default = "default_true")]
    pub analyze_pages: bool,

    /// Analyze captured network requests after each successful step
    #[serde(default = "default_true")]
    pub analyze_network: bool,

    /// Requests analyzed per step
    #[serde(default = "default_max_network_analyses")]
    pub max_network_analyses: usize,

    /// Have the coder role write a replay snippet for each analyzed request
    ///
    /// Snippets are stored in memory as text only; they are never run.
    #[serde(default = "default_true")]
    pub replay_snippets: bool,

    /// Infer an API schema from related `api-request` memories at summary time
    #[serde(default = "default_true")]
    pub infer_schemas: bool,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_snapshot_chars: default_max_snapshot_chars(),
            history_window: default_history_window(),
            max_plan_steps: default_max_plan_steps(),
            fix_retry: true,
            analyze_pages: true,
            analyze_network: true,
            max_network_analyses: default_max_network_analyses(),
            replay_snippets: true,
            infer_schemas: true,
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.navigator")
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::Ollama
}

fn default_general_role() -> RoleConfig {
    RoleConfig::ollama("hermes3")
}

fn default_coding_role() -> RoleConfig {
    RoleConfig::ollama("granite-code:8b")
}

fn default_reasoning_role() -> RoleConfig {
    RoleConfig::ollama("deepseek-r1:8b")
}

fn default_embedding_role() -> RoleConfig {
    RoleConfig::ollama("mxbai-embed-large")
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_browser_name() -> String {
    "chrome".to_string()
}

fn default_action_timeout() -> u64 {
    30
}

fn default_search_limit() -> usize {
    5
}

fn default_summary_search_limit() -> usize {
    10
}

fn default_fallback_dimensions() -> usize {
    768
}

fn default_max_snapshot_chars() -> usize {
    3000
}

fn default_history_window() -> usize {
    3
}

fn default_max_plan_steps() -> usize {
    12
}

fn default_max_network_analyses() -> usize {
    3
}

impl Config {
    /// Load configuration from the default location (~/.navigator/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, apply environment overrides and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();

        // The file keeps the unexpanded "~" form so it stays portable
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.navigator/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".navigator").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            browser: BrowserConfig::default(),
            memory: MemoryConfig::default(),
            navigator: NavigatorConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("navigator.db")
    }

    /// Apply `NAVIGATOR_*` overrides using the given variable lookup
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NAVIGATOR_OLLAMA_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.ollama_url = url;
        }

        for role in ModelRole::ALL {
            let key = format!("NAVIGATOR_{}_MODEL", role.as_str().to_uppercase());
            if let Some(model) = lookup(&key).filter(|v| !v.trim().is_empty()) {
                self.llm.roles.get_mut(role).model = model;
            }
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated fields and numeric ranges
    /// - Expands ~ in the data directory
    /// - Creates the data directory if it doesn't exist
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for role in ModelRole::ALL {
            if self.llm.roles.get(role).model.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "No model configured for the {} role",
                    role
                )));
            }
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.browser.action_timeout_secs == 0 {
            return Err(EngineError::Config(
                "action_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.memory.search_limit == 0 || self.memory.summary_search_limit == 0 {
            return Err(EngineError::Config(
                "memory search limits must be greater than 0".to_string(),
            ));
        }

        if self.memory.fallback_dimensions == 0 {
            return Err(EngineError::Config(
                "fallback_dimensions must be greater than 0".to_string(),
            ));
        }

        if !(1..=3).contains(&self.navigator.history_window) {
            return Err(EngineError::Config(
                "history_window must be between 1 and 3".to_string(),
            ));
        }

        if self.navigator.max_plan_steps == 0 {
            return Err(EngineError::Config(
                "max_plan_steps must be greater than 0".to_string(),
            ));
        }

        if self.navigator.max_snapshot_chars < 200 {
            return Err(EngineError::Config(
                "max_snapshot_chars must be at least 200".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.core.data_dir = self
            .core
            .data_dir
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(self.core.data_dir.clone(), e.to_string()))?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
