// =============================================================================
// Retry — exponential backoff around fallible async operations
// =============================================================================
//
// `with_retry` re-runs an operation while it fails with a retriable class
// (transient network / rate limit). Delay grows as base * factor^attempt;
// rate-limit responses use their own, longer base and honour a server-sent
// retry-after hint when one is present.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{TradingError, TradingResult};

/// Backoff parameters for one family of operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (so 3 means up to 2 retries).
    pub max_attempts: u32,
    /// Base delay for transient failures.
    pub base_delay: Duration,
    /// Multiplier applied per attempt: delay = base * factor^attempt.
    pub backoff_factor: f64,
    /// Add up to +25% random spread on each delay.
    pub jitter: bool,
    /// Base delay for rate-limit responses. Longer than `base_delay`.
    pub rate_limit_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter: false,
            rate_limit_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy for the session-health probe: 1s / 2s sleeps, 3 attempts.
    pub fn health_probe() -> Self {
        Self::default()
    }

    /// Policy derived from the rate-limit configuration keys.
    pub fn for_rate_limits(retries: u32, backoff_base_secs: f64) -> Self {
        Self {
            max_attempts: retries.max(1),
            rate_limit_base: Duration::from_secs_f64(backoff_base_secs.max(0.0)),
            ..Self::default()
        }
    }

    /// Delay before the retry following `attempt` (0-based) of `err`.
    fn delay_for(&self, err: &TradingError, attempt: u32) -> Duration {
        let base = if err.is_rate_limit() {
            self.rate_limit_base
        } else {
            self.base_delay
        };
        let mut secs = base.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        if let TradingError::RateLimit {
            retry_after: Some(hint),
            ..
        } = err
        {
            secs = secs.max(hint.as_secs_f64());
        }
        if self.jitter {
            secs *= 1.0 + rand::thread_rng().gen_range(0.0..0.25);
        }
        Duration::from_secs_f64(secs)
    }
}

/// Run `op`, retrying retriable failures according to `policy`.
///
/// Non-retriable errors and budget exhaustion surface the last error to the
/// caller unchanged.
pub async fn with_retry<T, F, Fut>(mut op: F, policy: &RetryPolicy) -> TradingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TradingResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(&err, attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    rate_limited = err.is_rate_limit(),
                    error = %err,
                    "operation failed — backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TradingError>(42)
                }
            },
            &RetryPolicy::default(),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TradingError::retriable("503"))
                    } else {
                        Ok(7)
                    }
                }
            },
            &RetryPolicy::default(),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_sequence_429_429_200() {
        // Three broker calls, two backoff sleeps, final value returned.
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy::for_rate_limits(3, 1.0);
        let started = tokio::time::Instant::now();
        let result = with_retry(
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TradingError::rate_limit("429", None))
                    } else {
                        Ok("quote")
                    }
                }
            },
            &policy,
        )
        .await;
        assert_eq!(result.unwrap(), "quote");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Sleeps of ~1.0s and ~2.0s under the configured 1.0s rate-limit base.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(3500), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_surfaces_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: TradingResult<()> = with_retry(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TradingError::data_validation("bad field"))
                }
            },
            &RetryPolicy::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(TradingError::DataValidation { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_returns_last_error() {
        let result: TradingResult<()> = with_retry(
            || async { Err(TradingError::retriable("always down")) },
            &RetryPolicy::default(),
        )
        .await;
        match result {
            Err(TradingError::Retriable { message }) => assert_eq!(message, "always down"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();
        let _ = with_retry(
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TradingError::rate_limit(
                            "429",
                            Some(Duration::from_secs(10)),
                        ))
                    } else {
                        Ok(())
                    }
                }
            },
            &RetryPolicy::default(),
        )
        .await;
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
