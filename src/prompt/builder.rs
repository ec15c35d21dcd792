//! Request construction from a prompt and a row.

use crate::client::{ApiRequest, Message, ResponseFormat};
use crate::models::{AeonError, PromptError, Result, RowFields};
use crate::prompt::{PromptDefinition, ResolvedOptions, Template, resolve_options};
use serde_json::{Map, Value, json};

/// Turns one row's fields into a fully-formed API request.
pub trait RequestBuilder: Send + Sync {
    /// Name of the prompt this builder renders
    fn prompt_name(&self) -> &str;

    /// Fields every row must provide
    fn variables(&self) -> &[String];

    /// Structured output schema, if any
    fn response_format(&self) -> Option<&ResponseFormat>;

    fn build(&self, fields: &RowFields) -> std::result::Result<ApiRequest, PromptError>;

    /// Everything besides the row that determines a request: model, options,
    /// messages and schema. Feeds the job's content hash.
    fn request_shape(&self) -> Value;
}

/// Builds requests from a registry prompt with resolved options.
#[derive(Debug, Clone)]
pub struct PromptRequestBuilder {
    name: String,
    static_messages: Vec<Message>,
    last_role: String,
    template: Template,
    resolved: ResolvedOptions,
    response_format: Option<ResponseFormat>,
}

impl PromptRequestBuilder {
    /// Resolve `definition`'s options against `overrides`.
    ///
    /// Fails with a configuration error when the options are incompatible
    /// with the model family.
    pub fn new(
        name: &str,
        definition: &PromptDefinition,
        overrides: &Map<String, Value>,
    ) -> Result<Self> {
        let resolved = resolve_options(&definition.options, overrides).map_err(AeonError::from)?;
        Ok(Self {
            name: name.to_string(),
            static_messages: definition.static_messages().to_vec(),
            last_role: definition.last_role().to_string(),
            template: definition.template(),
            resolved,
            response_format: definition.response_format.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.resolved.model
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.resolved
    }
}

impl RequestBuilder for PromptRequestBuilder {
    fn prompt_name(&self) -> &str {
        &self.name
    }

    fn variables(&self) -> &[String] {
        self.template.variables()
    }

    fn response_format(&self) -> Option<&ResponseFormat> {
        self.response_format.as_ref()
    }

    fn build(&self, fields: &RowFields) -> std::result::Result<ApiRequest, PromptError> {
        let mut messages = self.static_messages.clone();
        messages.push(Message::new(
            self.last_role.clone(),
            self.template.render(fields)?,
        ));

        Ok(ApiRequest {
            model: self.resolved.model.clone(),
            messages,
            response_format: self.response_format.clone(),
            options: self.resolved.options.clone(),
        })
    }

    fn request_shape(&self) -> Value {
        json!({
            "model": self.resolved.model,
            "options": self.resolved.options,
            "messages": self.static_messages,
            "template": {"role": self.last_role, "content": self.template.source()},
            "response_format": self.response_format,
        })
    }
}
