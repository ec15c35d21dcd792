//! API option resolution with model-family quirks.
//!
//! Precedence: family defaults < prompt file options < user overrides.
//! Null values in the merged result are dropped, so an override of `null`
//! removes an option.

use crate::models::ConfigError;
use serde_json::{Map, Value, json};

/// Model used when neither the prompt nor the user names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Model families with distinct option rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// gpt-5 and its point releases: no sampling or logprob options
    Gpt5,
    /// Everything else
    Standard,
}

impl ModelFamily {
    pub fn from_model(model: &str) -> Self {
        if model.contains("gpt-5") {
            Self::Gpt5
        } else {
            Self::Standard
        }
    }

    fn defaults(self) -> Map<String, Value> {
        let defaults = match self {
            Self::Gpt5 => json!({
                "reasoning_effort": "minimal",
                "verbosity": "low",
            }),
            Self::Standard => json!({
                "model": DEFAULT_MODEL,
                "temperature": 0.0,
                "logprobs": true,
            }),
        };
        match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn unsupported(self) -> &'static [&'static str] {
        match self {
            Self::Gpt5 => &["logprobs", "top_logprobs", "temperature"],
            Self::Standard => &[],
        }
    }
}

/// Effective options for one prompt, including `model`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub family: ModelFamily,
    pub model: String,
    /// All options except `model`
    pub options: Map<String, Value>,
}

/// Merge prompt options and user overrides under the family's rules.
pub fn resolve_options(
    prompt_options: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Result<ResolvedOptions, ConfigError> {
    let mut requested = prompt_options.clone();
    requested.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let model_hint = requested
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let family = ModelFamily::from_model(&model_hint);

    let mut rejected: Vec<String> = requested
        .iter()
        .filter(|(k, v)| family.unsupported().contains(&k.as_str()) && !v.is_null())
        .map(|(k, _)| k.clone())
        .collect();
    if !rejected.is_empty() {
        rejected.sort();
        return Err(ConfigError::IncompatibleOptions {
            model: model_hint,
            options: rejected,
        });
    }

    let mut options = family.defaults();
    options.extend(requested);
    options.retain(|_, v| !v.is_null());

    let model = match options.remove("model") {
        Some(Value::String(model)) => model,
        Some(other) => {
            return Err(ConfigError::Invalid(format!(
                "option 'model' must be a string, got {other}"
            )));
        }
        None => DEFAULT_MODEL.to_string(),
    };

    Ok(ResolvedOptions {
        family,
        model,
        options,
    })
}
