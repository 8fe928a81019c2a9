//! Jittered exponential backoff.
//!
//! Used by the durable-write worker between attempts of a failed task and
//! by the server while waiting for its stores to come up.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule with a ceiling and symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_pct: u64,
}

impl RetryPolicy {
    /// Build a policy. At least one attempt is always made, the base delay
    /// is at least 1 ms, the ceiling is never below the base, and jitter is
    /// clamped to `0..=100` percent.
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: u64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.min(100),
        }
    }

    /// Total attempts before giving up.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt + 1` (0-based): `base * 2^attempt`,
    /// capped, then spread by the jitter percentage.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2_u64.saturating_pow(attempt);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        if self.jitter_pct == 0 {
            return Duration::from_millis(delay);
        }
        let spread = delay
            .saturating_mul(self.jitter_pct)
            .checked_div(100)
            .unwrap_or(0);
        let offset = rand::rng().random_range(0..=spread.saturating_mul(2));
        Duration::from_millis(delay.saturating_sub(spread).saturating_add(offset))
    }

    /// Run `op` until it succeeds or the attempts are used up, sleeping
    /// between attempts. `op` receives the 0-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    let made = attempt.saturating_add(1);
                    if made >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = made,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = made;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, 1000, 60_000, 10)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 250);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 100);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, 1000, 60_000, 0);
        let delays: Vec<_> = (0..8).map(|attempt| policy.delay_for(attempt)).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[5], Duration::from_secs(32));
        assert_eq!(delays[6], Duration::from_secs(60));
        assert_eq!(delays[7], Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy::new(5, 1000, 1000, 20);
        for _ in 0..200 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_async_retries_until_success() {
        let policy = RetryPolicy::new(3, 10, 10, 0);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<&'static str, &str> = policy
            .retry_async(|attempt| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err("boom") } else { Ok("ok") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_async_stops_after_max_attempts() {
        let policy = RetryPolicy::new(2, 5, 5, 0);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), &str> = policy
            .retry_async(|_| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("nope")
                }
            })
            .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
