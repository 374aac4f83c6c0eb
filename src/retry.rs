//! One retry policy for every network-facing call.
//!
//! Bounded attempts, exponential backoff with jitter, a per-attempt timeout,
//! and failure classification through [`ArbError::is_retryable`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::{ArbError, ArbResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,

    /// Growth factor between attempts
    pub multiplier: f64,

    /// Random spread added to each delay, as a fraction of it
    pub jitter: f64,

    /// Budget for a single attempt
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.2,
            attempt_timeout_ms: 3_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Deterministic part of the delay before attempt `attempt` (1-based, > 1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi(attempt as i32 - 2);
        let ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(spread)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt is bounded by the attempt timeout,
    /// which surfaces as [`ArbError::Timeout`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> ArbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ArbResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.jittered(attempt);
                debug!("{}: retry {}/{} in {:?}", operation, attempt, attempts, delay);
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.attempt_timeout(), op()).await {
                Ok(result) => result,
                Err(_) => Err(ArbError::Timeout {
                    operation: operation.to_string(),
                    elapsed: started.elapsed(),
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!("{}: attempt {}/{} failed: {}", operation, attempt, attempts, err);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| ArbError::Unreachable(format!("{}: no attempts made", operation))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            jitter: 0.0,
            attempt_timeout_ms: 50,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 350,
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy(3)
            .run("quote", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ArbError::Unreachable("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stale_data_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ArbResult<()> = fast_policy(5)
            .run("quote", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ArbError::StaleData { what: "quote".into(), age_ms: 10, limit_ms: 1 })
                }
            })
            .await;
        assert!(matches!(result, Err(ArbError::StaleData { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_its_own_kind() {
        let result: ArbResult<()> = fast_policy(2)
            .run("slow", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ArbError::Timeout { .. })));
    }
}
