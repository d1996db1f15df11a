//! Bounded exponential backoff around single registry requests.

use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::{FetchError, throttle::RateBudget};

/// How often, and how patiently, a failed request is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first; at least 1.
  pub max_attempts:    u32,
  pub initial_backoff: Duration,
  pub max_backoff:     Duration,
}

impl RetryPolicy {
  /// Delay after the `attempt`-th failure (1-based): doubles each time,
  /// capped at `max_backoff`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    self
      .initial_backoff
      .saturating_mul(1 << exp)
      .min(self.max_backoff)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:    4,
      initial_backoff: Duration::from_millis(500),
      max_backoff:     Duration::from_secs(8),
    }
  }
}

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
  #[error("HTTP {0}")]
  Status(u16),
  #[error("transport: {0}")]
  Transport(String),
  #[error("decode: {0}")]
  Decode(String),
}

impl AttemptError {
  /// Rate limiting, server errors, and transport failures are worth another
  /// try; anything else will fail the same way again.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Status(status) => *status == 429 || (500..600).contains(status),
      Self::Transport(_) => true,
      Self::Decode(_) => false,
    }
  }

  fn into_fetch_error(self, topic: &str, attempts: u32) -> FetchError {
    let topic = topic.to_owned();
    match self {
      Self::Status(status) => FetchError::Status { topic, status, attempts },
      Self::Transport(message) => FetchError::Transport { topic, attempts, message },
      Self::Decode(message) => FetchError::Decode { topic, message },
    }
  }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Every attempt first waits on `budget`, so retries respect the politeness
/// throttle as well as the backoff.
pub async fn with_retry<T, F, Fut>(
  policy: &RetryPolicy,
  budget: &mut RateBudget,
  topic: &str,
  mut op: F,
) -> Result<T, FetchError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, AttemptError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 0;
  loop {
    attempt += 1;
    budget.acquire().await;

    match op().await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_retryable() && attempt < max_attempts => {
        let delay = policy.delay_for(attempt);
        tracing::warn!(
          topic,
          attempt,
          error = %err,
          delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
          "registry request failed, backing off"
        );
        tokio::time::sleep(delay).await;
      }
      Err(err) => return Err(err.into_fetch_error(topic, attempt)),
    }
  }
}
