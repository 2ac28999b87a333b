//! Retry with exponential backoff, plus error classification for model calls.
//!
//! Transient failures (429, 5xx, network timeouts) are retried. Permanent
//! failures (400/401/403/404/422) and unsupported-model errors never are.
//! Backoff sleeps race the cancellation token so an abort is honored mid-wait.

use crate::error::AgentError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = fail on the first error).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to scale delays down by a jitter factor.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter; avoids pulling in an RNG for this.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Whether an error message indicates a transient (retryable) failure.
pub fn is_transient_error(error: &str) -> bool {
    let transient_statuses = ["429", "500", "502", "503", "504"];
    if transient_statuses
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }

    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "broken pipe",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Whether an error message is a permanent (non-retryable) failure.
pub fn is_permanent_error(error: &str) -> bool {
    [
        "HTTP 400",
        "HTTP 401",
        "HTTP 403",
        "HTTP 404",
        "HTTP 422",
        "bad request",
        "unauthorized",
    ]
    .iter()
    .any(|p| error.contains(p))
}

/// Whether an API error body says the selected model cannot be used.
pub fn is_unsupported_model_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "model not supported",
        "model is not supported",
        "not a valid model",
        "unknown model",
        "no endpoints found",
        "does not support tool",
        "support tool use",
        "model_not_supported",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Map an HTTP failure from the model endpoint to an [`AgentError`].
pub fn classify_http_error(status: u16, body: &str) -> AgentError {
    if is_unsupported_model_error(body) {
        AgentError::ModelUnsupported(body.trim().to_string())
    } else {
        AgentError::Model(format!("HTTP {status}: {}", body.trim()))
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
///
/// Only [`AgentError::Model`] errors are considered for retry; cancellation
/// and unsupported-model errors return immediately.
pub async fn retry_api_call<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(AgentError::Model(msg))
                if attempt < config.max_retries
                    && is_transient_error(&msg)
                    && !is_permanent_error(&msg) =>
            {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Transient model error (attempt {}/{}): {msg}. Retrying in {delay:?}...",
                    attempt + 1,
                    config.max_retries,
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
