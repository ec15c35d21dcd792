//! Error types for aeon.
//!
//! Failures split along the job timeline:
//! - Before dispatch: configuration and pre-flight errors abort the job
//! - After dispatch: provider and checkpoint errors are contained per row
//! - Anything else is an internal invariant violation

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for aeon.
#[derive(Debug, Error)]
pub enum AeonError {
    // ═══════════════════════════════════════════════════════════════════
    // PRE-FLIGHT: raised before any API call is made
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Input table is missing variable(s) required by prompt '{prompt}': {missing:?}")]
    MissingVariables { prompt: String, missing: Vec<String> },

    #[error("Output directory already exists: {0}")]
    OutputDirExists(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // ROW-LEVEL: recorded on a RowResult, never abort the job
    // ═══════════════════════════════════════════════════════════════════

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Checkpoint for row {0} already exists")]
    CheckpointExists(usize),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INTERNAL: invariant broken
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the prompt registry and template rendering.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt not found: '{0}'")]
    NotFound(String),

    #[error("Prompt '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("Missing value for template variable '{0}'")]
    MissingVariable(String),

    #[error("Failed to read prompt file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse prompt file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Errors returned by a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("Provider server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: u16, message: String, model: &str) -> Self {
        match status {
            429 => Self::RateLimited {
                message,
                retry_after_secs: None,
            },
            401 => Self::AuthenticationFailed,
            404 => Self::ModelNotFound(model.to_string()),
            500..=599 => Self::Server { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Server-suggested delay for a rate limit, if one was sent.
    ///
    /// Reported alongside the fixed wait; it does not change the wait.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Transient errors are expected to resolve themselves and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout(_)
        )
    }
}

impl AeonError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error with context.
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Whether this error belongs to the pre-flight class that aborts a job.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Prompt(_)
                | Self::MissingVariables { .. }
                | Self::OutputDirExists(_)
                | Self::InvalidInput(_)
        )
    }
}

/// Render an error and its source chain, one cause per line.
///
/// Row results record this in place of a stack trace.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Result type alias for aeon.
pub type Result<T> = std::result::Result<T, AeonError>;
