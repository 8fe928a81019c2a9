//! Deadline and cancellation guard for store calls.
//!
//! Every store call made by the engine goes through [`guarded`]. The call
//! future is dropped when the deadline elapses or the caller's token is
//! cancelled, which releases any pooled connection it holds.

use std::future::Future;
use std::time::Duration;

use leaderboard_db::DbError;
use tokio_util::sync::CancellationToken;

use crate::config::TimeoutConfig;
use crate::error::LeaderboardError;

/// Read and write deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Deadline for store reads.
    pub read: Duration,
    /// Deadline for store writes.
    pub write: Duration,
}

impl Deadlines {
    /// Build from explicit durations.
    pub const fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for Deadlines {
    fn from(config: &TimeoutConfig) -> Self {
        Self::new(config.read(), config.write())
    }
}

/// Await `fut` under a deadline and a cancellation token.
///
/// # Errors
///
/// Returns [`LeaderboardError::Cancelled`] if `cancel` fires first,
/// [`LeaderboardError::DeadlineExceeded`] if `limit` elapses first, and
/// the converted [`DbError`] if the call itself fails.
pub async fn guarded<T, F>(
    operation: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, LeaderboardError>
where
    F: Future<Output = Result<T, DbError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(operation, "Store call cancelled");
            Err(LeaderboardError::Cancelled)
        }
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner.map_err(LeaderboardError::from),
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(operation, timeout_ms, "Store call exceeded deadline");
                Err(LeaderboardError::DeadlineExceeded { operation, timeout_ms })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_hits_deadline() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = guarded("read_score", Duration::from_millis(50), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(LeaderboardError::DeadlineExceeded {
                operation: "read_score",
                timeout_ms: 50
            })
        );
    }

    #[tokio::test]
    async fn cancelled_token_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<u8, _> =
            guarded("read_score", Duration::from_secs(1), &cancel, async { Ok(1) }).await;
        assert_eq!(result, Err(LeaderboardError::Cancelled));
    }

    #[tokio::test]
    async fn store_errors_are_converted() {
        let cancel = CancellationToken::new();
        let result: Result<u8, _> = guarded("cardinality", Duration::from_secs(1), &cancel, async {
            Err(DbError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(LeaderboardError::StoreUnavailable(_))));
    }
}
