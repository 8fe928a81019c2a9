//! Join Projector: merges ranked entries with metadata and profiles.

use std::collections::HashMap;
use std::sync::Arc;

use leaderboard_db::DurableStore;
use leaderboard_types::{LeaderboardView, PlayerMeta, Profile, RankedEntry, TenantId};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::deadline::{Deadlines, guarded};
use crate::error::LeaderboardError;

/// Builds [`LeaderboardView`]s with one batched profile lookup per call.
///
/// A failed profile load, a missing profile row, and a malformed profile
/// document all yield default profile fields; only cancellation is
/// propagated.
#[derive(Clone)]
pub struct Projector {
    durable: Arc<dyn DurableStore>,
    deadlines: Deadlines,
}

impl Projector {
    /// Create a projector reading profiles from `durable`.
    pub fn new(durable: Arc<dyn DurableStore>, deadlines: Deadlines) -> Self {
        Self { durable, deadlines }
    }

    /// Project `entries` in order.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::Cancelled`] if `cancel` fires during the
    /// profile lookup.
    pub async fn project(
        &self,
        tenant: &TenantId,
        entries: Vec<RankedEntry>,
        mut metadata: HashMap<String, PlayerMeta>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaderboardView>, LeaderboardError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = entries.iter().map(|e| e.player_id.clone()).collect();
        let profiles = match guarded(
            "load_profiles",
            self.deadlines.read,
            cancel,
            self.durable.load_profiles(tenant, &ids),
        )
        .await
        {
            Ok(profiles) => profiles,
            Err(LeaderboardError::Cancelled) => return Err(LeaderboardError::Cancelled),
            Err(e) => {
                tracing::warn!(tenant = %tenant, players = ids.len(), error = %e, "Profile load failed, using defaults");
                HashMap::new()
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let (profile, data) = profiles
                    .get(&entry.player_id)
                    .and_then(|raw| parse_profile(tenant, &entry.player_id, raw))
                    .unwrap_or_else(|| (Profile::default(), Value::Null));
                let meta = metadata.remove(&entry.player_id);
                LeaderboardView::assemble(entry, meta, profile, data)
            })
            .collect())
    }
}

fn parse_profile(tenant: &TenantId, player_id: &str, raw: &str) -> Option<(Profile, Value)> {
    Profile::parse(raw)
        .map_err(|e| {
            tracing::warn!(tenant = %tenant, player = player_id, error = %e, "Malformed profile document");
        })
        .ok()
}
