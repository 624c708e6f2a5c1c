use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::tools::CommandPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "sitesmith.json";
pub const DEFAULT_MAX_STEPS: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("API key not found. Set {0} or pass --api-key.")]
    MissingApiKey(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    OpenAI,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.5-flash",
            Provider::OpenAI => "gpt-4o",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            other => Err(ConfigError::Invalid(format!("unknown provider '{}'", other))),
        }
    }
}

/// Values given on the command line. They are applied after the file and
/// the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<Provider>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub workspace_root: Option<PathBuf>,
    pub max_steps: Option<usize>,
}

/// Settings for one agent process. Layered as defaults, then the JSON file,
/// then environment, then command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_steps: usize,
    pub workspace_root: PathBuf,
    pub command_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub allow_any_command: bool,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            base_url: None,
            api_key: None,
            max_steps: DEFAULT_MAX_STEPS,
            workspace_root: PathBuf::from("."),
            command_timeout_secs: 60,
            request_timeout_secs: 600,
            allow_any_command: false,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey(self.provider.api_key_var()))
    }

    pub fn command_policy(&self) -> CommandPolicy {
        if self.allow_any_command {
            CommandPolicy::Unrestricted
        } else {
            CommandPolicy::FoldersOnly
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("SITESMITH_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(model) = lookup("SITESMITH_MODEL") {
            self.model = Some(model);
        }
        if let Some(base_url) = lookup("SITESMITH_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(steps) = lookup("SITESMITH_MAX_STEPS") {
            self.max_steps = steps
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SITESMITH_MAX_STEPS is not a number: {}", steps)))?;
        }
        if let Some(root) = lookup("SITESMITH_WORKSPACE") {
            self.workspace_root = PathBuf::from(root);
        }
        if self.api_key.is_none() {
            self.api_key = lookup(self.provider.api_key_var());
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        self.apply_overrides_from(overrides, |key| std::env::var(key).ok())
    }

    /// Switching provider looks up that provider's key variable. A key that
    /// is already set is kept when the variable is missing.
    pub fn apply_overrides_from<F>(&mut self, overrides: &ConfigOverrides, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = overrides.provider {
            if provider != self.provider {
                self.provider = provider;
                match lookup(provider.api_key_var()) {
                    Some(key) => {
                        if self.api_key.is_some() {
                            warn!(var = provider.api_key_var(), "provider changed, API key replaced from environment");
                        }
                        self.api_key = Some(key);
                    }
                    None if self.api_key.is_some() => {
                        warn!(
                            provider = %provider,
                            var = provider.api_key_var(),
                            "provider changed but its key variable is unset, keeping the configured key"
                        );
                    }
                    None => {}
                }
            }
        }
        if let Some(key) = &overrides.api_key {
            self.api_key = Some(key.clone());
        }
        if let Some(model) = &overrides.model {
            self.model = Some(model.clone());
        }
        if let Some(base_url) = &overrides.base_url {
            self.base_url = Some(base_url.clone());
        }
        if let Some(root) = &overrides.workspace_root {
            self.workspace_root = root.clone();
        }
        if let Some(steps) = overrides.max_steps {
            self.max_steps = steps;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be at least 1".to_string()));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid("command_timeout_secs must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

pub async fn load_config(config_path: &Path) -> Result<AgentConfig, ConfigError> {
    if !config_path.exists() {
        return Ok(AgentConfig::default());
    }

    let content = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}
