//! `$variable` message templates.
//!
//! Placeholders are `$identifier` (ASCII letters, digits and underscores, not
//! starting with a digit). `$$` renders a literal `$`. A `$` that starts
//! neither form is kept as-is.

use crate::models::{PromptError, RowFields};
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*))").expect("valid placeholder pattern")
});

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    variables: Vec<String>,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut variables: Vec<String> = Vec::new();
        for cap in PLACEHOLDER.captures_iter(&source) {
            if let Some(name) = cap.get(2) {
                if !variables.iter().any(|v| v == name.as_str()) {
                    variables.push(name.as_str().to_string());
                }
            }
        }
        Self { source, variables }
    }

    /// Variable names in order of first appearance.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute every placeholder from `fields`.
    pub fn render(&self, fields: &RowFields) -> Result<String, PromptError> {
        if let Some(missing) = self.variables.iter().find(|v| !fields.contains_key(*v)) {
            return Err(PromptError::MissingVariable(missing.clone()));
        }

        let rendered = PLACEHOLDER.replace_all(&self.source, |cap: &regex::Captures| {
            match cap.get(2) {
                Some(name) => fields.get(name.as_str()).cloned().unwrap_or_default(),
                None => "$".to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}
