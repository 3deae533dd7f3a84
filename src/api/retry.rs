//! Outbound HTTP with per-attempt timeouts and exponential backoff.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::redact::redact_credentials;

/// Retry policy for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time.
    pub base_delay: Duration,
    /// Upper bound on any single backoff.
    pub max_delay: Duration,
    /// Upper bound on the random jitter added to each backoff.
    pub max_jitter: Duration,
    /// Budget for one attempt, body included.
    pub timeout_per_attempt: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_jitter: Duration::from_millis(250),
            timeout_per_attempt: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)` capped at `max_delay`, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(30);
        self.base_delay
            .saturating_mul(1u32 << pow)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max))
    }
}

/// Authenticated JSON client that retries transient failures.
#[derive(Clone)]
pub struct RetryingHttpClient {
    client: Client,
    token: String,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    pub fn new(token: impl Into<String>, policy: RetryPolicy) -> Result<Self, TransportError> {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .build()
            .map_err(TransportError::Network)?;

        Ok(Self {
            client,
            token: token.into(),
            policy,
        })
    }

    /// Send a request, retrying 429/5xx and network failures. Returns the 2xx response.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let (err, retry_after) = match self.attempt(method.clone(), url, body).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(TransportError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = retry_after
                .map(|d| d.min(self.policy.max_delay))
                .unwrap_or_else(|| self.policy.backoff(attempt))
                + self.policy.jitter();

            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                %method,
                url = %redact_credentials(url),
                error = %err,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Send a request and decode its JSON body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, TransportError> {
        let response = self.request(method, url, body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        // Some endpoints answer 200 with an empty body.
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response, (TransportError, Option<Duration>)> {
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .timeout(self.policy.timeout_per_attempt);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err((TransportError::Timeout(self.policy.timeout_per_attempt), None))
            }
            Err(e) => return Err((TransportError::Network(e), None)),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        Err((
            TransportError::Status {
                status,
                detail: error_detail(status, &text),
            },
            retry_after,
        ))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefer a JSON `error` or `message` field over the raw body.
fn error_detail(status: StatusCode, text: &str) -> String {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        for key in ["error", "message"] {
            match body.get(key) {
                Some(Value::String(message)) => return message.clone(),
                Some(Value::Object(inner)) => {
                    if let Some(message) = inner.get("message").and_then(Value::as_str) {
                        return message.to_string();
                    }
                }
                _ => {}
            }
        }
    }

    if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text.trim().to_string()
    }
}
