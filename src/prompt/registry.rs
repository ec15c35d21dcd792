//! Prompt registry.
//!
//! Prompts are TOML files in a directory, one per prompt, named
//! `<prompt_name>.toml`:
//!
//! ```toml
//! [[messages]]
//! role = "developer"
//! content = "Rewrite the joke..."
//!
//! [[messages]]
//! role = "user"
//! content = "prompt: $prompt\njoke: $joke"
//!
//! [options]
//! model = "gpt-5-mini"
//!
//! [response_format]
//! name = "Response"
//! schema = { type = "object", properties = { joke_2 = { type = "string" } } }
//! ```
//!
//! Every message but the last is static. The last message is the template
//! rendered from each row.

use crate::client::{Message, ResponseFormat};
use crate::models::PromptError;
use crate::prompt::Template;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// A prompt as declared on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Chat messages; the last one is the row template
    pub messages: Vec<Message>,

    /// Default API options for this prompt
    #[serde(default)]
    pub options: Map<String, Value>,

    /// Structured output schema
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
}

impl PromptDefinition {
    pub fn from_toml(name: &str, content: &str, path: &Path) -> Result<Self, PromptError> {
        let definition: Self = toml::from_str(content).map_err(|e| PromptError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        definition.validate(name)?;
        Ok(definition)
    }

    fn validate(&self, name: &str) -> Result<(), PromptError> {
        if self.messages.is_empty() {
            return Err(PromptError::Invalid {
                name: name.to_string(),
                reason: "at least one message is required".to_string(),
            });
        }
        if let Some(format) = &self.response_format {
            if !format.schema.is_object() {
                return Err(PromptError::Invalid {
                    name: name.to_string(),
                    reason: "response_format.schema must be a table".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Messages sent unchanged with every row.
    pub fn static_messages(&self) -> &[Message] {
        &self.messages[..self.messages.len().saturating_sub(1)]
    }

    /// The row template built from the last message.
    pub fn template(&self) -> Template {
        Template::new(
            self.messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default(),
        )
    }

    pub fn last_role(&self) -> &str {
        self.messages.last().map(|m| m.role.as_str()).unwrap_or("user")
    }
}

/// Named prompt definitions, resolved by explicit lookup.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptDefinition>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file in `dir`.
    pub fn load(dir: &Path) -> Result<Self, PromptError> {
        let entries = fs::read_dir(dir).map_err(|e| PromptError::FileRead {
            path: dir.to_owned(),
            source: e,
        })?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| PromptError::FileRead {
                    path: dir.to_owned(),
                    source: e,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // `_template.toml` and friends are scaffolding, not prompts.
            if name.starts_with('_') {
                continue;
            }

            let content = fs::read_to_string(&path).map_err(|e| PromptError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            let definition = PromptDefinition::from_toml(name, &content, &path)?;
            registry.insert(name, definition);
        }

        debug!(dir = %dir.display(), count = registry.len(), "Loaded prompt registry");
        Ok(registry)
    }

    /// Register a definition under `name`, replacing any previous one.
    pub fn insert(&mut self, name: &str, definition: PromptDefinition) {
        if definition.response_format.is_none() {
            warn!(
                prompt = name,
                "No response_format specified for prompt. We recommend providing one."
            );
        }
        self.prompts.insert(name.to_string(), definition);
    }

    pub fn get(&self, name: &str) -> Result<&PromptDefinition, PromptError> {
        self.prompts
            .get(name)
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }

    /// Prompt names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.prompts.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const JOKE_PROMPT: &str = r#"
[[messages]]
role = "developer"
content = "Punch up the joke."

[[messages]]
role = "user"
content = "prompt: $prompt\njoke: $joke"

[options]
model = "gpt-5-mini"

[response_format]
name = "Response"
schema = { type = "object", properties = { joke_2 = { type = "string" } }, required = ["joke_2"] }
"#;

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("rewrite_joke.toml"), JOKE_PROMPT).unwrap();
        fs::write(dir.path().join("_template.toml"), JOKE_PROMPT).unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let registry = PromptRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.names(), vec!["rewrite_joke"]);

        let prompt = registry.get("rewrite_joke").unwrap();
        assert_eq!(prompt.static_messages().len(), 1);
        assert_eq!(prompt.last_role(), "user");
        assert_eq!(prompt.template().variables(), ["prompt", "joke"]);
        assert_eq!(prompt.options["model"], "gpt-5-mini");
        let format = prompt.response_format.as_ref().unwrap();
        assert_eq!(format.schema["properties"]["joke_2"]["type"], "string");
    }

    #[test]
    fn test_unknown_prompt() {
        let registry = PromptRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(PromptError::NotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_prompt_without_messages_is_invalid() {
        let err =
            PromptDefinition::from_toml("empty", "messages = []\n", Path::new("empty.toml"))
                .unwrap_err();
        assert!(matches!(err, PromptError::Invalid { .. }));
    }
}
