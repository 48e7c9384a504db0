//! Bounded retry with deterministic exponential backoff.
//!
//! Each attempt reports an explicit [`Attempt`] tag; the loop retries only
//! `Transient` outcomes and sleeps `initial × multiplier^(n-1)` after the
//! n-th failed attempt. No jitter is applied.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use rawlake_core::config::FetchConfig;

use crate::error::FetchError;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Worth retrying (rate limited, overloaded, timed out, unreachable).
    Transient(String),
    /// Retrying will not help.
    Permanent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never zero.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2.0,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff())
    }

    /// Sleep after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Permanent(reason) => return Err(FetchError::Permanent { reason }),
            Attempt::Transient(reason) if attempt >= policy.max_attempts => {
                return Err(FetchError::Transient {
                    attempts: attempt,
                    reason,
                });
            }
            Attempt::Transient(reason) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn delays_double_from_initial() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=4).map(|n| policy.delay_after(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(100, Duration::from_millis(500));
        assert_eq!(policy.delay_after(90), MAX_BACKOFF);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_with_doubling_sleeps() {
        let policy = RetryPolicy::default();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::default();

        let result: Result<(), FetchError> = retry_with_backoff(&policy, |_| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(Instant::now());
                Attempt::Transient("HTTP 503".into())
            }
        })
        .await;

        match result {
            Err(FetchError::Transient { attempts, reason }) => {
                assert_eq!(attempts, 5);
                assert_eq!(reason, "HTTP 503");
            }
            other => panic!("expected transient exhaustion, got {other:?}"),
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<u128> = calls.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![500, 1000, 2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_stops_after_one_attempt() {
        let policy = RetryPolicy::default();
        let mut seen = Vec::new();

        let result: Result<(), FetchError> = retry_with_backoff(&policy, |n| {
            seen.push(n);
            async { Attempt::Permanent("HTTP 404".into()) }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Permanent { .. })));
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result = retry_with_backoff(&policy, |n| async move {
            if n < 3 {
                Attempt::Transient("HTTP 429".into())
            } else {
                Attempt::Success(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }
}
