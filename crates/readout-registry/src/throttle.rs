//! Per-fetcher politeness budget.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between consecutive requests.
///
/// Each topic's fetch owns one budget and passes it by `&mut`, so two topics
/// fetched concurrently never share (or contend for) the same clock.
#[derive(Debug, Clone)]
pub struct RateBudget {
  min_interval: Duration,
  last_request: Option<Instant>,
}

impl RateBudget {
  pub fn new(min_interval: Duration) -> Self {
    Self { min_interval, last_request: None }
  }

  /// A budget that never waits.
  pub fn unthrottled() -> Self { Self::new(Duration::ZERO) }

  pub fn min_interval(&self) -> Duration { self.min_interval }

  /// Wait until a request may be sent, then mark it as sent.
  pub async fn acquire(&mut self) {
    if let Some(last) = self.last_request {
      let ready_at = last + self.min_interval;
      if ready_at > Instant::now() {
        tokio::time::sleep_until(ready_at).await;
      }
    }
    self.last_request = Some(Instant::now());
  }
}
