//! Capped exponential backoff for persistence failures.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
  pub max_retries: usize,
  pub base_delay:  Duration,
  pub max_delay:   Duration,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay:  Duration::from_millis(100),
      max_delay:   Duration::from_secs(2),
    }
  }
}

impl BackoffPolicy {
  pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
    let factor = u32::try_from(attempt_index)
      .ok()
      .and_then(|shift| 1u32.checked_shl(shift))
      .unwrap_or(u32::MAX);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `op` until it succeeds, fails with a non-retryable error, or the
  /// retry budget is spent. The last error is returned as-is.
  pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Err(err) if err.is_retryable() && attempt < self.max_retries => {
          let delay = self.delay_for_attempt(attempt);
          warn!(%err, attempt, ?delay, "{what} failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        result => return result,
      }
    }
  }
}
