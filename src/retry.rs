//! Bounded retry with exponential backoff for fallible async operations.
//!
//! This wraps engine-level queries; it is independent of the post-only
//! re-quote loop inside venue adapters, so the two never compound beyond
//! the fixed outer bound.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::{GridError, Result};

/// Retry policy: up to `max_attempts` tries with exponential backoff
/// clamped between `min_backoff` and `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            min_backoff,
            max_backoff,
        }
    }

    /// Backoff before the next attempt, with ±25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .min_backoff
            .saturating_mul(1u32 << attempt.min(10))
            .min(self.max_backoff);
        let jitter_range = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_range);
        base + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds or attempts are exhausted; the last error
    /// is propagated. Non-transient errors abort immediately.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = GridError::Internal("retry policy with zero attempts".to_string());

        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(
                        "Operation failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_err = e;
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        error!(
            "Operation failed after {} attempts: {}",
            self.max_attempts, last_err
        );
        Err(last_err)
    }

    /// Like [`execute`](Self::execute), but on exhaustion returns the
    /// caller-supplied default instead of propagating.
    pub async fn execute_or<T, F, Fut>(&self, op: F, default: T) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.execute(op).await {
            Ok(value) => value,
            Err(e) => {
                error!("Operation failed after all retries, returning default: {}", e);
                default
            }
        }
    }
}
