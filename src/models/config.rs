//! Configuration models for aeon.
//!
//! Every tunable of a labeling run lives here and is loaded from TOML.
//! Credentials are resolved explicitly and handed to client constructors;
//! nothing here writes to the process environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration for aeon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Labeling run settings
    #[serde(default)]
    pub labeling: LabelingConfig,

    /// Retry policy for transient provider errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Provider endpoints, keyed by provider name ("openai", "openrouter", ...)
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Labeling run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingConfig {
    /// Parent directory under which job directories are created
    #[serde(default = "default_parent_dir")]
    pub parent_dir: PathBuf,

    /// Directory holding prompt definition files
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Number of rows processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Delete the per-row checkpoint directory after an uninterrupted run
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

fn default_parent_dir() -> PathBuf {
    PathBuf::from("data/labels")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_max_workers() -> usize {
    15
}

fn default_true() -> bool {
    true
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            parent_dir: default_parent_dir(),
            prompts_dir: default_prompts_dir(),
            max_workers: default_max_workers(),
            cleanup: true,
        }
    }
}

/// Retry configuration.
///
/// The wait chain is fixed: the n-th retry waits `wait_chain_secs[n]`, and
/// the last entry repeats if the chain is shorter than the attempt budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per row, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait before each retry
    #[serde(default = "default_wait_chain")]
    pub wait_chain_secs: Vec<f64>,

    /// Upper bound on a single attempt; 0 disables the bound
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

/// Longest accepted wait between retries, in seconds.
pub const MAX_WAIT_SECS: f64 = 86_400.0;

fn default_max_attempts() -> u32 {
    3
}

fn default_wait_chain() -> Vec<f64> {
    vec![6.0, 60.0]
}

fn default_attempt_timeout() -> u64 {
    180
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_chain_secs: default_wait_chain(),
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl RetryConfig {
    pub fn wait_chain(&self) -> Vec<Duration> {
        self.wait_chain_secs
            .iter()
            .map(|s| {
                let secs = if s.is_nan() { 0.0 } else { s.clamp(0.0, MAX_WAIT_SECS) };
                Duration::from_secs_f64(secs)
            })
            .collect()
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }
}

/// Configuration for one OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    /// API key; may contain ${ENV_VAR} placeholders
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable to read the API key from
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    180
}

impl ProviderConfig {
    /// Built-in settings for a provider the user did not configure.
    pub fn builtin(name: &str) -> Option<Self> {
        let (base_url, env) = match name {
            "openai" => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
            "openrouter" => ("https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
            _ => return None,
        };
        Some(Self {
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: Some(env.to_string()),
            timeout_secs: default_timeout(),
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Provider settings, falling back to built-in defaults.
    pub fn provider(&self, name: &str) -> Result<ProviderConfig, ConfigError> {
        self.providers
            .get(name)
            .cloned()
            .or_else(|| ProviderConfig::builtin(name))
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }

    /// Resolve the API key for a provider from config or environment.
    pub fn resolve_api_key(&self, name: &str) -> Result<String, ConfigError> {
        let provider = self.provider(name)?;

        if let Some(key) = &provider.api_key {
            return Ok(expand_env_vars(key));
        }

        let env_var = provider
            .api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", name.to_uppercase()));
        std::env::var(&env_var).map_err(|_| ConfigError::MissingApiKey {
            provider: name.to_string(),
            env_var,
        })
    }

    /// Check the settings that would otherwise fail at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.labeling.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "labeling.max_workers must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(bad) = self
            .retry
            .wait_chain_secs
            .iter()
            .find(|s| !s.is_finite() || **s < 0.0 || **s > MAX_WAIT_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "retry.wait_chain_secs entries must be between 0 and {MAX_WAIT_SECS}, got {bad}"
            )));
        }
        Ok(())
    }
}

static ENV_PLACEHOLDER: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid placeholder pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_PLACEHOLDER.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for provider '{provider}': set {env_var} env var or api_key in config")]
    MissingApiKey { provider: String, env_var: String },

    #[error("Unknown provider '{0}' (not built in and not configured in [providers.*])")]
    UnknownProvider(String),

    #[error("Model '{model}' does not accept these options: {options:?}")]
    IncompatibleOptions { model: String, options: Vec<String> },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
