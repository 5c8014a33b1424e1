//! Configuration management for the relay.
//!
//! The relay reads a single TOML file, `config.toml`.
//!
//! # Lookup Order
//!
//! 1. Explicit path (`--config`)
//! 2. `RELAY_CONFIG` environment variable
//! 3. `./config.toml` in the working directory
//! 4. `~/.ollama-relay/config.toml`
//!
//! # Environment Variable Mapping
//!
//! - `RELAY_HOMESERVER` → bot.homeserver
//! - `RELAY_PASSWORD` → bot.password
//! - `RELAY_ACCESS_TOKEN` → bot.access_token
//! - `RELAY_ALLOWED_USER` → bot.user_id
//! - `RELAY_MODEL` → llm.model
//! - `OLLAMA_BASE_URL` → llm.endpoint
//! - `RELAY_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "config.toml";

/// Default local Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ollama-relay"),
        |dirs| dirs.home_dir().join(".ollama-relay"),
    )
}

/// Resolve which config file to read.
///
/// Returns the first candidate in lookup order. The user-level path is
/// returned even when it does not exist so the load error names it.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_path(path);
    }
    if let Ok(path) = std::env::var("RELAY_CONFIG") {
        return expand_path(&path);
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return local;
    }
    config_dir().join(CONFIG_FILE)
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// Bot (Matrix account) Configuration
// ============================================================================

/// Matrix account the relay logs in as, and the single user it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Matrix homeserver URL (e.g., "https://matrix.org")
    pub homeserver: String,
    /// Localpart or full MXID used for password login
    #[serde(default)]
    pub username: String,
    /// Password for `m.login.password`
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-issued access token; skips password login when set
    #[serde(default)]
    pub access_token: Option<String>,
    /// The only user allowed to talk to the bot (e.g., "@me:matrix.org")
    pub user_id: String,
    /// Device display name sent on login
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_device_name() -> String {
    "ollama-relay".into()
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Inference endpoint and sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama model name (e.g., "llama3")
    pub model: String,
    /// System prompt every new conversation starts with
    #[serde(default)]
    pub default_prompt: String,
    /// Ollama base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Request timeout for a single chat completion
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_OLLAMA_URL.into()
}

fn default_timeout_secs() -> u64 {
    300
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env(explicit: Option<&str>) -> Result<Self> {
        let path = resolve_config_path(explicit);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(homeserver) = std::env::var("RELAY_HOMESERVER") {
            self.bot.homeserver = homeserver;
        }
        if let Ok(password) = std::env::var("RELAY_PASSWORD") {
            self.bot.password = Some(password);
        }
        if let Ok(token) = std::env::var("RELAY_ACCESS_TOKEN") {
            self.bot.access_token = Some(token);
        }
        if let Ok(user) = std::env::var("RELAY_ALLOWED_USER") {
            self.bot.user_id = user;
        }
        if let Ok(model) = std::env::var("RELAY_MODEL") {
            self.llm.model = model;
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.endpoint = url;
        }
        if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Homeserver URL without a trailing slash.
    pub fn homeserver(&self) -> &str {
        self.bot.homeserver.trim_end_matches('/')
    }

    /// Ollama base URL without a trailing slash.
    pub fn ollama_url(&self) -> &str {
        self.llm.endpoint.trim_end_matches('/')
    }
}
