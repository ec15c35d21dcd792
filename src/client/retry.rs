//! Bounded retry around a single provider call.
//!
//! Only transient errors (rate limits, server faults, attempt timeouts) are
//! retried. The wait before each retry comes from a fixed chain rather than
//! an exponential schedule: 6s before the second attempt, 60s before the
//! third by default.

use crate::client::{ApiRequest, Provider, ProviderResponse};
use crate::models::{ProviderError, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule for one row's API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before the n-th retry; the last entry repeats
    pub wait_chain: Vec<Duration>,
    /// Bound on a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            wait_chain: config.wait_chain(),
            attempt_timeout: config.attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based).
    pub fn wait_before(&self, retry: usize) -> Duration {
        self.wait_chain
            .get(retry)
            .or_else(|| self.wait_chain.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Wraps a provider with the retry policy.
pub struct RetryingCaller {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Call the provider, retrying transient failures.
    ///
    /// Non-transient errors return immediately. When every attempt fails
    /// transiently, the last error is returned.
    pub async fn call(
        &self,
        row_id: usize,
        request: &ApiRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut attempt = 1;
        loop {
            let err = match self.attempt(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(row_id, attempt, "Call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.policy.max_attempts {
                return Err(err);
            }

            let wait = self.policy.wait_before(attempt as usize - 1);
            warn!(
                row_id,
                provider = self.provider.name(),
                attempt,
                wait_secs = wait.as_secs_f64(),
                retry_after_secs = ?err.retry_after(),
                error = %err,
                "Transient provider error, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ProviderResponse, ProviderError> {
        match self.policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.call(request))
                .await
                .map_err(|_| ProviderError::Timeout(limit))?,
            None => self.provider.call(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Provider that replays a script of outcomes and records call times.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn call(&self, _request: &ApiRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
        }
    }

    /// Never answers; used to exercise the attempt timeout.
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn call(&self, _request: &ApiRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    fn ok() -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            raw: json!({"choices": []}),
            content: json!({"label": "funny"}),
        })
    }

    fn rate_limited() -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: None,
        })
    }

    fn request() -> ApiRequest {
        ApiRequest {
            model: "gpt-4.1-nano".into(),
            messages: vec![crate::client::Message::user("hi")],
            response_format: None,
            options: serde_json::Map::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let provider = ScriptedProvider::new(vec![rate_limited(), rate_limited(), ok()]);
        let caller = RetryingCaller::new(provider.clone(), RetryPolicy::default());

        let response = caller.call(0, &request()).await.unwrap();
        assert_eq!(response.content, json!({"label": "funny"}));

        let times = provider.call_times();
        assert_eq!(times.len(), 3);
        let first_wait = times[1] - times[0];
        let second_wait = times[2] - times[1];
        assert!(first_wait >= Duration::from_secs(6) && first_wait < Duration::from_secs(7));
        assert!(second_wait >= Duration::from_secs(60) && second_wait < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_transient_error() {
        let provider = ScriptedProvider::new(vec![
            rate_limited(),
            Err(ProviderError::Server {
                status: 502,
                message: "bad gateway".into(),
            }),
            rate_limited(),
            ok(),
        ]);
        let caller = RetryingCaller::new(provider.clone(), RetryPolicy::default());

        let err = caller.call(1, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(provider.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Api {
                status: 400,
                message: "invalid schema".into(),
            }),
            ok(),
        ]);
        let caller = RetryingCaller::new(provider.clone(), RetryPolicy::default());

        let err = caller.call(2, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
        assert_eq!(provider.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_and_is_retried() {
        let policy = RetryPolicy {
            max_attempts: 2,
            wait_chain: vec![Duration::from_secs(1)],
            attempt_timeout: Some(Duration::from_secs(5)),
        };
        let caller = RetryingCaller::new(Arc::new(HangingProvider), policy);

        let started = Instant::now();
        let err = caller.call(3, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(started.elapsed() >= Duration::from_secs(11));
    }

    #[test]
    fn test_wait_chain_repeats_last_entry() {
        let policy = RetryPolicy {
            max_attempts: 5,
            wait_chain: vec![Duration::from_secs(6), Duration::from_secs(60)],
            attempt_timeout: None,
        };
        assert_eq!(policy.wait_before(0), Duration::from_secs(6));
        assert_eq!(policy.wait_before(1), Duration::from_secs(60));
        assert_eq!(policy.wait_before(3), Duration::from_secs(60));
    }
}
