//! Config Resolver: read-through cache in front of the config table.

use std::sync::Arc;

use leaderboard_db::{DurableStore, FastStore};
use leaderboard_types::{LeaderboardConfig, LeaderboardKey};
use tokio_util::sync::CancellationToken;

use crate::deadline::{Deadlines, guarded};
use crate::error::LeaderboardError;

/// Resolves leaderboard configurations through the fast-store cache.
///
/// Cache failures never fail a resolution: a cache read error falls
/// through to the durable store and a cache write error is logged.
#[derive(Clone)]
pub struct ConfigResolver {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    deadlines: Deadlines,
}

impl ConfigResolver {
    /// Create a resolver over the given stores.
    pub fn new(fast: Arc<dyn FastStore>, durable: Arc<dyn DurableStore>, deadlines: Deadlines) -> Self {
        Self {
            fast,
            durable,
            deadlines,
        }
    }

    /// The configuration for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::ConfigMissing`] if no configuration
    /// exists, or a store, deadline, or cancellation error from the durable
    /// lookup.
    pub async fn resolve(
        &self,
        key: &LeaderboardKey,
        cancel: &CancellationToken,
    ) -> Result<LeaderboardConfig, LeaderboardError> {
        match guarded("cached_config", self.deadlines.read, cancel, self.fast.cached_config(key)).await {
            Ok(Some(config)) => return Ok(config),
            Ok(None) => {}
            Err(LeaderboardError::Cancelled) => return Err(LeaderboardError::Cancelled),
            Err(e) => {
                tracing::warn!(leaderboard = %key, error = %e, "Config cache read failed, using durable store");
            }
        }

        let config = guarded("get_config", self.deadlines.read, cancel, self.durable.get_config(key))
            .await?
            .ok_or_else(|| LeaderboardError::ConfigMissing(key.to_string()))?;

        if let Err(e) =
            guarded("cache_config", self.deadlines.write, cancel, self.fast.cache_config(&config)).await
        {
            tracing::warn!(leaderboard = %key, error = %e, "Config cache write failed");
        }
        Ok(config)
    }

    /// Drop the cached configuration for `key`.
    ///
    /// # Errors
    ///
    /// Returns a store, deadline, or cancellation error.
    pub async fn invalidate(
        &self,
        key: &LeaderboardKey,
        cancel: &CancellationToken,
    ) -> Result<(), LeaderboardError> {
        guarded("invalidate_config", self.deadlines.write, cancel, self.fast.invalidate_config(key)).await?;
        tracing::debug!(leaderboard = %key, "Invalidated cached config");
        Ok(())
    }
}
