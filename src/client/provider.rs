//! Provider abstraction and request payload types.
//!
//! A `Provider` performs exactly one structured-output call. Retrying is the
//! caller's business, see [`crate::client::RetryingCaller`].

use crate::models::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Structured output schema attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// Schema name reported to the provider
    pub name: String,
    /// JSON Schema the response must conform to
    pub schema: Value,
}

/// A fully-formed request for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub response_format: Option<ResponseFormat>,
    /// Remaining API options (temperature, logprobs, reasoning_effort, ...)
    pub options: Map<String, Value>,
}

impl ApiRequest {
    /// Request as a flat JSON object, without the response schema.
    ///
    /// This is the form recorded in checkpoints and the output table.
    pub fn to_kwargs(&self) -> Value {
        let mut kwargs = self.options.clone();
        kwargs.insert("model".to_string(), Value::String(self.model.clone()));
        kwargs.insert(
            "messages".to_string(),
            serde_json::to_value(&self.messages).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(kwargs)
    }

    /// Wire body for an OpenAI-compatible `/chat/completions` call.
    pub fn to_body(&self) -> Value {
        let mut body = match self.to_kwargs() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(format) = &self.response_format {
            body.insert(
                "response_format".to_string(),
                serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": format.name,
                        "schema": format.schema,
                        "strict": true,
                    }
                }),
            );
        }
        Value::Object(body)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Full response body
    pub raw: Value,
    /// Parsed structured content
    pub content: Value,
}

/// One blocking structured-output call against an LLM provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (for logging)
    fn name(&self) -> &str;

    async fn call(&self, request: &ApiRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Infer the provider serving a model.
///
/// OpenAI models are called directly; everything else goes through OpenRouter.
pub fn infer_provider(model: &str) -> &'static str {
    if model.contains("gpt") {
        "openai"
    } else {
        "openrouter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ApiRequest {
        let mut options = Map::new();
        options.insert("temperature".into(), json!(0.0));
        ApiRequest {
            model: "gpt-4.1-nano".into(),
            messages: vec![Message::new("developer", "label it"), Message::user("text: hi")],
            response_format: Some(ResponseFormat {
                name: "Label".into(),
                schema: json!({"type": "object"}),
            }),
            options,
        }
    }

    #[test]
    fn test_kwargs_strip_schema() {
        let kwargs = request().to_kwargs();
        assert!(kwargs.get("response_format").is_none());
        assert_eq!(kwargs["model"], "gpt-4.1-nano");
        assert_eq!(kwargs["temperature"], 0.0);
        assert_eq!(kwargs["messages"][1]["content"], "text: hi");
    }

    #[test]
    fn test_body_carries_json_schema() {
        let body = request().to_body();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "Label");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn test_infer_provider() {
        assert_eq!(infer_provider("gpt-5-mini"), "openai");
        assert_eq!(infer_provider("google/gemma-3-27b-it"), "openrouter");
    }
}
