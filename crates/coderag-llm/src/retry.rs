use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// Bounded exponential backoff for transient model server failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before attempt `attempt + 1`, doubling from `base_delay` and capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Parse the `Retry-After` header value as seconds, falling back to exponential backoff.
pub(crate) fn retry_delay(
    response: &reqwest::Response,
    policy: &RetryPolicy,
    attempt: u32,
) -> Duration {
    if let Some(val) = response.headers().get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.parse::<u64>()
    {
        return Duration::from_secs(secs).min(policy.max_delay);
    }
    policy.backoff(attempt)
}

/// Send an HTTP request, retrying transient failures up to `policy.max_retries` times.
///
/// Failures are classified by [`LlmError::is_transient`]: 429 and 5xx responses, timeouts and
/// connection errors are retried, anything else is returned immediately. On success the response
/// is handed back to the caller for body decoding.
///
/// # Errors
///
/// Returns `LlmError::RateLimited`, `LlmError::Timeout` or `LlmError::Status` when all attempts
/// are exhausted, and `LlmError::Http` for non-retryable transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &'static str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let last = attempt >= policy.max_retries;
        let (err, delay) = match f().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let delay = retry_delay(&response, policy, attempt);
                let body = response.text().await.unwrap_or_default();
                let err = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    LlmError::RateLimited
                } else {
                    LlmError::Status {
                        provider,
                        status: status.as_u16(),
                        body,
                    }
                };
                (err, delay)
            }
            Err(e) if e.is_timeout() => (LlmError::Timeout, policy.backoff(attempt)),
            Err(e) => (LlmError::Http(e), policy.backoff(attempt)),
        };

        if !err.is_transient() {
            tracing::error!(provider, "request failed: {err}");
            return Err(err);
        }
        if last {
            return Err(err);
        }
        tracing::warn!(
            provider,
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "transient failure, retrying: {err}"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
