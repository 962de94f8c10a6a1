//! Shared HTTP retry loop for the AI providers.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: `base_delay × 2^(attempt-1)`, exponent capped at 5

use anyhow::{bail, Result};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }

    /// Upper bound on one retried call: every attempt running to
    /// `per_attempt`, plus the backoff between attempts.
    pub fn deadline(&self, per_attempt: Duration) -> Duration {
        let backoff: Duration = (1..=self.max_retries).map(|a| self.delay(a)).sum();
        per_attempt * (self.max_retries + 1) + backoff
    }
}

/// Sends the request built by `build` until it succeeds or retries run out,
/// returning the successful response.
///
/// `build` is called once per attempt because request bodies such as
/// multipart forms cannot be cloned.
pub async fn send_with_retry<F>(
    service: &str,
    policy: RetryPolicy,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            tracing::debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(service, %status, attempt, "transient API error");
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        service,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                tracing::warn!(service, attempt, error = %e, "request failed");
                last_err = Some(anyhow::anyhow!("{} connection error: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", service)))
}

/// Like [`send_with_retry`], decoding the successful body as JSON.
pub async fn send_json_with_retry<F>(
    service: &str,
    policy: RetryPolicy,
    build: F,
) -> Result<serde_json::Value>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let response = send_with_retry(service, policy, build).await?;
    Ok(response.json().await?)
}
