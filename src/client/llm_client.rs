//! Generic LLM client for OpenAI-compatible endpoints.
//!
//! Performs one structured-output chat completion per call and classifies
//! failures into transient and permanent provider errors.

use crate::client::{ApiRequest, Provider, ProviderResponse};
use crate::models::{AeonError, Config, ProviderConfig, ProviderError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// LLM client for any OpenAI-compatible endpoint (OpenAI, OpenRouter,
/// vLLM, Ollama, ...).
pub struct LlmClient {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    /// Base URL for the API
    base_url: String,
    /// Request timeout
    timeout: Duration,
    // Usage tracking
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LlmClient {
    /// Create a new LLM client.
    pub fn new(
        name: String,
        api_key: Option<String>,
        base_url: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AeonError::Provider(ProviderError::Network(e)))?;

        Ok(Self {
            client,
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Build a client from provider settings and an already-resolved key.
    pub fn from_config(name: &str, config: &ProviderConfig, api_key: Option<String>) -> Result<Self> {
        Self::new(
            name.to_string(),
            api_key,
            config.base_url.clone(),
            config.timeout_secs,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("aeon"));
        headers
    }

    /// Turn a non-success response into a classified error.
    fn classify_failure(
        &self,
        status: u16,
        headers: &HeaderMap,
        body: String,
        model: &str,
    ) -> ProviderError {
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match ProviderError::from_status(status, message, model) {
            ProviderError::RateLimited { message, .. } => ProviderError::RateLimited {
                message,
                retry_after_secs: headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<f64>().ok()),
            },
            other => other,
        }
    }

    /// Pull usage counters and the structured content out of a response body.
    fn parse_body(&self, raw: &Value) -> std::result::Result<Value, ProviderError> {
        if let Some(usage) = raw.get("usage") {
            let input = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            let output = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            self.total_input_tokens.fetch_add(input, Ordering::Relaxed);
            self.total_output_tokens.fetch_add(output, Ordering::Relaxed);
        }
        parse_structured_content(raw)
    }

    /// Get total tokens tracked.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Provider for LlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &ApiRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&request.to_body())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Network(e)
                }
            })?;

        let status = response.status();
        debug!(endpoint = %self.name, model = %request.model, status = status.as_u16(), "Completion response");

        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_failure(status.as_u16(), &headers, body, &request.model));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;
        let content = self.parse_body(&raw)?;
        let (input_tokens, output_tokens) = self.total_tokens();
        debug!(endpoint = %self.name, input_tokens, output_tokens, "Cumulative token usage");

        Ok(ProviderResponse { raw, content })
    }
}

/// Extract the structured output from a chat completion body.
///
/// The first choice's message content must be a JSON document; a refusal
/// or non-JSON content is an invalid response.
pub fn parse_structured_content(raw: &Value) -> std::result::Result<Value, ProviderError> {
    let message = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

    if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
        return Err(ProviderError::InvalidResponse(format!(
            "Model refused: {refusal}"
        )));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("Empty message content".to_string()))?;

    serde_json::from_str(content).map_err(|e| {
        ProviderError::InvalidResponse(format!("Content does not match structured output: {e}"))
    })
}

/// Create the provider serving `model`, resolving its credentials explicitly.
pub fn create_provider(config: &Config, model: &str) -> Result<Arc<dyn Provider>> {
    let name = crate::client::infer_provider(model);
    let settings = config.provider(name)?;
    let api_key = config.resolve_api_key(name)?;
    debug!(provider = name, base_url = %settings.base_url, "create_provider");
    Ok(Arc::new(LlmClient::from_config(
        name,
        &settings,
        Some(api_key),
    )?))
}
