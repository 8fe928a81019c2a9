//! Leaderboard Core: the public operations of the engine.
//!
//! The fast store is the source of truth for rankings; the durable store
//! trails it through the [`DurableWriter`]. Every store call goes through
//! [`guarded`], so it carries a deadline and honours the caller's
//! cancellation token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leaderboard_db::{DurableStore, FastStore, RankRow, WriteOutcome};
use leaderboard_types::{
    ConfigPatch, EntryMetadata, LeaderboardConfig, LeaderboardKey, LeaderboardView, NewLeaderboard, RankInfo,
    MAX_SCORE_MAGNITUDE, RankedEntry, ScoreWrite, SortDirection, SubmitResult, TenantId, WriteTask, is_exact_score,
    validate_category, validate_player,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RebuildConfig;
use crate::deadline::{Deadlines, guarded};
use crate::error::LeaderboardError;
use crate::policy::{Decision, decide};
use crate::projector::Projector;
use crate::resolver::ConfigResolver;
use crate::writer::DurableWriter;

/// Widest rank window `top` serves in one call.
pub const MAX_TOP_WINDOW: u64 = 1000;

/// Largest page `page_durable` serves in one call.
pub const MAX_PAGE_LIMIT: u64 = 1000;

/// Result of [`Leaderboard::rebuild_from_durable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    /// Rows fed into the fast store.
    pub restored: u64,
    /// Rows the durable store holds for the leaderboard.
    pub durable_total: u64,
}

/// One page of durable rows for the admin console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurablePage {
    /// Rows in rank order.
    pub rows: Vec<DurableRow>,
    /// Total rows for the leaderboard.
    pub total: u64,
    /// Offset of the first row.
    pub offset: u64,
}

/// A durable rank row as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableRow {
    /// Player identifier.
    pub player_id: String,
    /// Stored score.
    pub score: i64,
    /// Stored `extraData` document, `null` if absent or unparsable.
    pub extra_data: Value,
    /// First acceptance time.
    pub created_at: DateTime<Utc>,
    /// Latest acceptance time.
    pub updated_at: DateTime<Utc>,
}

impl From<RankRow> for DurableRow {
    fn from(row: RankRow) -> Self {
        Self {
            extra_data: parse_extra(row.extra_data.as_deref()),
            player_id: row.player_id,
            score: row.score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn parse_extra(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or(Value::Null)
}

/// The leaderboard engine.
///
/// Instantiated once per process with its stores injected. All methods
/// take `&self` and are safe to call concurrently.
pub struct Leaderboard {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    resolver: ConfigResolver,
    projector: Projector,
    writer: Arc<DurableWriter>,
    deadlines: Deadlines,
    rebuild: RebuildConfig,
}

impl Leaderboard {
    /// Assemble the engine.
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        writer: Arc<DurableWriter>,
        deadlines: Deadlines,
        rebuild: RebuildConfig,
    ) -> Self {
        Self {
            resolver: ConfigResolver::new(Arc::clone(&fast), Arc::clone(&durable), deadlines),
            projector: Projector::new(Arc::clone(&durable), deadlines),
            fast,
            durable,
            writer,
            deadlines,
            rebuild,
        }
    }

    /// The durable-write worker.
    pub const fn writer(&self) -> &Arc<DurableWriter> {
        &self.writer
    }

    // =======================================================================
    // Game operations
    // =======================================================================

    /// Submit a score under the leaderboard's update policy.
    ///
    /// On acceptance the entry and its metadata are written atomically,
    /// the cap is enforced, and durable upsert/delete tasks are queued.
    /// Once the fast-store write commits, cancellation no longer affects
    /// the outcome. A conditional write that loses to a concurrent better
    /// score comes back as rejected, with the stored score.
    ///
    /// # Errors
    ///
    /// - [`LeaderboardError::InvalidTenant`] / [`LeaderboardError::InvalidArgument`] for bad identifiers
    /// - [`LeaderboardError::InvalidArgument`] if the score, or a `sum` result, lies outside ±2^53
    /// - [`LeaderboardError::ConfigMissing`] / [`LeaderboardError::Disabled`]
    /// - [`LeaderboardError::StoreUnavailable`] if the fast store fails; nothing is queued
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_score(
        &self,
        tenant: &str,
        category: &str,
        player_id: &str,
        score: i64,
        extra_data: Option<Value>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SubmitResult, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        validate_player(player_id)?;
        if !is_exact_score(score) {
            return Err(inexact_score(score));
        }
        let config = self.resolver.resolve(&key, cancel).await?;
        if !config.enabled {
            return Err(LeaderboardError::Disabled(key.to_string()));
        }

        let current = guarded("read_score", self.deadlines.read, cancel, self.fast.read_score(&key, player_id)).await?;
        let (final_score, write) = match decide(config.update_policy, config.sort, current, score) {
            Decision::Accept { score, .. } if !is_exact_score(score) => return Err(inexact_score(score)),
            Decision::Accept { score, write } => (score, write),
            Decision::Reject => {
                tracing::debug!(leaderboard = %key, player = player_id, score, "Submission rejected by policy");
                return self.rejected(&key, player_id, current, config.sort, cancel).await;
            }
        };

        let previous = match guarded(
            "read_entry_metadata",
            self.deadlines.read,
            cancel,
            self.fast.read_entry_metadata(&key, player_id),
        )
        .await
        {
            Ok(meta) => meta,
            Err(LeaderboardError::SerializationError(e)) => {
                tracing::warn!(leaderboard = %key, player = player_id, error = %e, "Discarding unreadable entry metadata");
                None
            }
            Err(e) => return Err(e),
        };
        let extra_data = extra_data.unwrap_or(Value::Null);
        let metadata = EntryMetadata {
            created_at: previous.map_or(now, |m| m.created_at),
            updated_at: now,
            extra_data,
        };

        // The write and the durable hand-off run detached: once the fast
        // store commits, the durable tasks are queued even if the caller
        // has gone away.
        let commit = tokio::spawn(commit_submission(
            Arc::clone(&self.fast),
            Arc::clone(&self.writer),
            self.deadlines.write,
            Submission {
                key: key.clone(),
                player_id: player_id.to_owned(),
                write,
                metadata,
                cap: config.cap,
                sort: config.sort,
                fallback_score: final_score,
                now,
            },
        ));
        let (stored, outcome) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LeaderboardError::Cancelled),
            joined = commit => joined.map_err(|e| {
                LeaderboardError::StoreUnavailable(format!("submission task failed: {e}"))
            })??,
        };
        if !outcome.changed {
            if matches!(write, ScoreWrite::Increment(_)) {
                return Err(inexact_score(final_score));
            }
            tracing::debug!(leaderboard = %key, player = player_id, score, "Submission lost to a concurrent write");
            return self.rejected(&key, player_id, outcome.score, config.sort, cancel).await;
        }

        tracing::debug!(
            leaderboard = %key,
            player = player_id,
            score = stored,
            evicted = outcome.evicted.len(),
            "Accepted submission"
        );
        Ok(SubmitResult {
            accepted: true,
            score: Some(stored),
            rank: None,
            evicted_players: outcome.evicted,
        })
    }

    async fn rejected(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        score: Option<i64>,
        sort: SortDirection,
        cancel: &CancellationToken,
    ) -> Result<SubmitResult, LeaderboardError> {
        let rank = guarded("read_rank", self.deadlines.read, cancel, self.fast.read_rank(key, player_id, sort)).await?;
        Ok(SubmitResult {
            accepted: false,
            score,
            rank,
            evicted_players: Vec::new(),
        })
    }

    /// Entries ranked `start_rank..=stop_rank` (1-based), joined with
    /// metadata and profiles. Ranks past the end are simply absent.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::InvalidArgument`] for an empty, zero-based,
    /// or oversized window, plus the errors of config resolution and the
    /// fast store.
    pub async fn top(
        &self,
        tenant: &str,
        category: &str,
        start_rank: u64,
        stop_rank: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaderboardView>, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        if start_rank == 0 || stop_rank < start_rank {
            return Err(LeaderboardError::InvalidArgument(format!(
                "rank window {start_rank}..={stop_rank} must satisfy 1 <= start <= stop"
            )));
        }
        if stop_rank.saturating_sub(start_rank) >= MAX_TOP_WINDOW {
            return Err(LeaderboardError::InvalidArgument(format!(
                "rank window wider than {MAX_TOP_WINDOW}"
            )));
        }
        let config = self.resolver.resolve(&key, cancel).await?;

        let start = start_rank.saturating_sub(1);
        let stop = stop_rank.saturating_sub(1);
        let members = guarded(
            "range_by_rank",
            self.deadlines.read,
            cancel,
            self.fast.range_by_rank(&key, config.sort, start, stop),
        )
        .await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = members.iter().map(|(player, _)| player.clone()).collect();
        let metadata = guarded("read_metadata", self.deadlines.read, cancel, self.fast.read_metadata(&key, &ids)).await?;

        let entries: Vec<RankedEntry> = members
            .into_iter()
            .zip(start_rank..)
            .map(|((player_id, score), rank)| RankedEntry {
                rank,
                player_id,
                score,
            })
            .collect();
        self.projector
            .project(&key.tenant, entries, metadata, cancel)
            .await
    }

    /// A player's 1-based rank and score, or `None` if the player has no
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns the errors of identifier validation, config resolution, and
    /// the fast store.
    pub async fn rank_of(
        &self,
        tenant: &str,
        category: &str,
        player_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RankInfo>, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        validate_player(player_id)?;
        let config = self.resolver.resolve(&key, cancel).await?;
        guarded(
            "read_position",
            self.deadlines.read,
            cancel,
            self.fast.read_position(&key, player_id, config.sort),
        )
        .await
    }

    /// Remove a player's entry. Removing an absent entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns the errors of identifier validation, config resolution, and
    /// the fast store.
    pub async fn remove(
        &self,
        tenant: &str,
        category: &str,
        player_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        validate_player(player_id)?;
        self.resolver.resolve(&key, cancel).await?;
        let removal = guarded("remove", self.deadlines.write, cancel, self.fast.remove(&key, player_id)).await?;
        self.writer.enqueue(WriteTask::delete(&key, player_id, removal.version));
        tracing::debug!(leaderboard = %key, player = player_id, removed = removal.removed, "Removed entry");
        Ok(removal.removed > 0)
    }

    /// Empty the leaderboard in both stores. Returns the number of fast
    /// store entries removed.
    ///
    /// # Errors
    ///
    /// Returns the errors of identifier validation, config resolution, and
    /// the fast store.
    pub async fn clear(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        self.resolver.resolve(&key, cancel).await?;
        self.clear_key(&key, cancel).await
    }

    async fn clear_key(
        &self,
        key: &LeaderboardKey,
        cancel: &CancellationToken,
    ) -> Result<u64, LeaderboardError> {
        let removal = guarded("clear", self.deadlines.write, cancel, self.fast.clear(key)).await?;
        self.writer.enqueue(WriteTask::truncate(key, removal.version));
        tracing::info!(leaderboard = %key, removed = removal.removed, version = removal.version, "Cleared leaderboard");
        Ok(removal.removed)
    }

    /// Reset a leaderboard for a crossed schedule boundary.
    ///
    /// The boundary is claimed with a compare-and-set on `last_reset_at`;
    /// only the winner clears the leaderboard. If the clear fails, the claim
    /// is handed back so a later tick retries the same boundary. Returns
    /// whether this call performed the reset.
    ///
    /// # Errors
    ///
    /// Returns the errors of the durable claim and the fast-store clear.
    pub async fn reset(
        &self,
        config: &LeaderboardConfig,
        boundary: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool, LeaderboardError> {
        let key = config.key();
        let claimed = guarded(
            "mark_reset",
            self.deadlines.write,
            cancel,
            self.durable.mark_reset(&key, config.last_reset_at, boundary),
        )
        .await?;
        if !claimed {
            tracing::debug!(leaderboard = %key, %boundary, "Reset already claimed elsewhere");
            return Ok(false);
        }
        let removed = match self.clear_key(&key, cancel).await {
            Ok(removed) => removed,
            Err(e) => {
                self.release_reset(&key, boundary, config.last_reset_at).await;
                return Err(e);
            }
        };
        if let Err(e) = self.resolver.invalidate(&key, cancel).await {
            tracing::warn!(leaderboard = %key, error = %e, "Could not invalidate config after reset");
        }
        tracing::info!(leaderboard = %key, %boundary, removed, "Scheduled reset applied");
        Ok(true)
    }

    async fn release_reset(&self, key: &LeaderboardKey, boundary: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        let restore = guarded(
            "restore_reset",
            self.deadlines.write,
            &CancellationToken::new(),
            self.durable.restore_reset(key, boundary, previous),
        )
        .await;
        match restore {
            Ok(true) => tracing::warn!(leaderboard = %key, %boundary, "Reset failed; boundary released for retry"),
            Ok(false) => tracing::warn!(leaderboard = %key, %boundary, "Reset failed; boundary already moved on"),
            Err(e) => tracing::error!(leaderboard = %key, %boundary, error = %e, "Reset failed and boundary could not be released"),
        }
    }

    /// Reload the fast store from the durable store.
    ///
    /// The fast store is cleared, then up to `cap` rows (or the safety
    /// ceiling when uncapped) are streamed in rank order and written with
    /// insert-if-absent semantics, so entries written concurrently by live
    /// submissions are kept.
    ///
    /// # Errors
    ///
    /// Returns the errors of config resolution and either store.
    pub async fn rebuild_from_durable(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        let config = self.resolver.resolve(&key, cancel).await?;
        let ceiling = if config.is_capped() {
            u64::from(config.cap).min(self.rebuild.safety_ceiling)
        } else {
            self.rebuild.safety_ceiling
        };
        let page_size = self.rebuild.page_size.max(1);

        guarded("clear", self.deadlines.write, cancel, self.fast.clear(&key)).await?;

        let mut restored: u64 = 0;
        let mut offset: u64 = 0;
        let mut durable_total: u64 = 0;
        while offset < ceiling {
            let limit = page_size.min(ceiling.saturating_sub(offset));
            let (rows, total) = guarded(
                "page_ranks",
                self.deadlines.read,
                cancel,
                self.durable.page_ranks(&key, config.sort, offset, limit),
            )
            .await?;
            durable_total = total;
            if rows.is_empty() {
                break;
            }
            let fetched = u64::try_from(rows.len()).unwrap_or(u64::MAX);
            for row in rows {
                let metadata = EntryMetadata {
                    extra_data: parse_extra(row.extra_data.as_deref()),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                };
                let outcome = guarded(
                    "apply_write",
                    self.deadlines.write,
                    cancel,
                    self.fast.apply_write(
                        &key,
                        &row.player_id,
                        ScoreWrite::IfAbsent(row.score),
                        &metadata,
                        config.cap,
                        config.sort,
                    ),
                )
                .await?;
                for evicted in &outcome.evicted {
                    self.writer.enqueue(WriteTask::delete(&key, evicted, outcome.version));
                }
                restored = restored.saturating_add(1);
            }
            offset = offset.saturating_add(fetched);
        }

        tracing::info!(leaderboard = %key, restored, durable_total, "Rebuilt fast store from durable store");
        Ok(RebuildReport {
            restored,
            durable_total,
        })
    }

    /// Drop the cached configuration so the next call re-reads it.
    ///
    /// # Errors
    ///
    /// Returns identifier errors and fast-store errors.
    pub async fn invalidate_config(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        self.resolver.invalidate(&key, cancel).await
    }

    // =======================================================================
    // Admin operations
    // =======================================================================

    /// Create the per-tenant rank and profile tables.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::InvalidTenant`] or a durable-store error.
    pub async fn provision_tenant(
        &self,
        tenant: &str,
        cancel: &CancellationToken,
    ) -> Result<TenantId, LeaderboardError> {
        let tenant = TenantId::parse(tenant)?;
        guarded("provision_tenant", self.deadlines.write, cancel, self.durable.provision_tenant(&tenant)).await?;
        Ok(tenant)
    }

    /// Create a leaderboard.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::ConfigExists`] if the key is taken, plus
    /// identifier and store errors.
    pub async fn create_leaderboard(
        &self,
        tenant: &str,
        request: NewLeaderboard,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<LeaderboardConfig, LeaderboardError> {
        let tenant = TenantId::parse(tenant)?;
        validate_category(&request.category)?;
        let config = LeaderboardConfig::from_request(tenant, request, now);
        let key = config.key();

        let inserted = guarded("insert_config", self.deadlines.write, cancel, self.durable.insert_config(&config)).await?;
        if !inserted {
            return Err(LeaderboardError::ConfigExists(key.to_string()));
        }
        if let Err(e) = self.resolver.invalidate(&key, cancel).await {
            tracing::warn!(leaderboard = %key, error = %e, "Could not invalidate config cache");
        }
        tracing::info!(
            leaderboard = %key,
            sort = config.sort.as_str(),
            policy = config.update_policy.as_str(),
            cap = config.cap,
            schedule = %config.reset_schedule,
            "Created leaderboard"
        );
        Ok(config)
    }

    /// Apply a partial update to a configuration and invalidate its cache.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::ConfigMissing`] if absent, plus
    /// identifier and store errors.
    pub async fn update_leaderboard(
        &self,
        tenant: &str,
        category: &str,
        patch: ConfigPatch,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<LeaderboardConfig, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        let mut config = self.load_config(&key, cancel).await?;
        patch.apply(&mut config, now);

        let updated = guarded("update_config", self.deadlines.write, cancel, self.durable.update_config(&config)).await?;
        if !updated {
            return Err(LeaderboardError::ConfigMissing(key.to_string()));
        }
        self.resolver.invalidate(&key, cancel).await?;
        tracing::info!(leaderboard = %key, "Updated leaderboard config");
        Ok(config)
    }

    /// Delete a leaderboard: its configuration, its fast-store entries, and
    /// (asynchronously) its durable rows.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::ConfigMissing`] if absent, plus
    /// identifier and store errors.
    pub async fn delete_leaderboard(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        let deleted = guarded("delete_config", self.deadlines.write, cancel, self.durable.delete_config(&key)).await?;
        if !deleted {
            return Err(LeaderboardError::ConfigMissing(key.to_string()));
        }
        self.resolver.invalidate(&key, cancel).await?;
        self.clear_key(&key, cancel).await?;
        tracing::info!(leaderboard = %key, "Deleted leaderboard");
        Ok(())
    }

    /// The stored configuration, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::ConfigMissing`] if absent, plus
    /// identifier and store errors.
    pub async fn get_leaderboard(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<LeaderboardConfig, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        self.load_config(&key, cancel).await
    }

    /// Every leaderboard of a tenant, ordered by category.
    ///
    /// # Errors
    ///
    /// Returns identifier and store errors.
    pub async fn list_leaderboards(
        &self,
        tenant: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaderboardConfig>, LeaderboardError> {
        let tenant = TenantId::parse(tenant)?;
        guarded("list_configs", self.deadlines.read, cancel, self.durable.list_configs(&tenant)).await
    }

    /// One page of durable rows in rank order.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::InvalidArgument`] for a zero or oversized
    /// limit, plus config and store errors.
    pub async fn page_durable(
        &self,
        tenant: &str,
        category: &str,
        offset: u64,
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<DurablePage, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(LeaderboardError::InvalidArgument(format!(
                "limit must be within 1..={MAX_PAGE_LIMIT}"
            )));
        }
        let config = self.resolver.resolve(&key, cancel).await?;
        let (rows, total) = guarded(
            "page_ranks",
            self.deadlines.read,
            cancel,
            self.durable.page_ranks(&key, config.sort, offset, limit),
        )
        .await?;
        Ok(DurablePage {
            rows: rows.into_iter().map(DurableRow::from).collect(),
            total,
            offset,
        })
    }

    /// Return parked durable writes to the queue. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderboardError::StoreUnavailable`] if the queue table
    /// cannot be updated.
    pub async fn replay_dead_letters(&self) -> Result<u64, LeaderboardError> {
        Ok(self.writer.replay_dead_letters().await?)
    }

    /// Enabled configurations, for the reset scheduler.
    pub(crate) async fn enabled_configs(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaderboardConfig>, LeaderboardError> {
        guarded("list_enabled_configs", self.deadlines.read, cancel, self.durable.list_enabled_configs()).await
    }

    async fn load_config(
        &self,
        key: &LeaderboardKey,
        cancel: &CancellationToken,
    ) -> Result<LeaderboardConfig, LeaderboardError> {
        guarded("get_config", self.deadlines.read, cancel, self.durable.get_config(key))
            .await?
            .ok_or_else(|| LeaderboardError::ConfigMissing(key.to_string()))
    }

    /// Player count in the fast store.
    ///
    /// # Errors
    ///
    /// Returns identifier and fast-store errors.
    pub async fn cardinality(
        &self,
        tenant: &str,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, LeaderboardError> {
        let key = LeaderboardKey::parse(tenant, category)?;
        guarded("cardinality", self.deadlines.read, cancel, self.fast.cardinality(&key)).await
    }
}

/// An accepted submission ready to be written.
struct Submission {
    key: LeaderboardKey,
    player_id: String,
    write: ScoreWrite,
    metadata: EntryMetadata,
    cap: u32,
    sort: SortDirection,
    fallback_score: i64,
    now: DateTime<Utc>,
}

/// Apply the fast-store write and queue the matching durable tasks.
async fn commit_submission(
    fast: Arc<dyn FastStore>,
    writer: Arc<DurableWriter>,
    deadline: Duration,
    sub: Submission,
) -> Result<(i64, WriteOutcome), LeaderboardError> {
    let outcome = guarded(
        "apply_write",
        deadline,
        &CancellationToken::new(),
        fast.apply_write(&sub.key, &sub.player_id, sub.write, &sub.metadata, sub.cap, sub.sort),
    )
    .await?;
    let stored = outcome.score.unwrap_or(sub.fallback_score);

    if outcome.changed && !outcome.evicted.contains(&sub.player_id) {
        let extra = serialize_extra(&sub.metadata.extra_data);
        writer.enqueue(WriteTask::upsert(
            &sub.key,
            &sub.player_id,
            stored,
            extra,
            sub.now,
            outcome.version,
        ));
    }
    for evicted in &outcome.evicted {
        writer.enqueue(WriteTask::delete(&sub.key, evicted, outcome.version));
    }
    Ok((stored, outcome))
}

fn inexact_score(score: i64) -> LeaderboardError {
    LeaderboardError::InvalidArgument(format!(
        "score {score} is outside the exact range ±{MAX_SCORE_MAGNITUDE}"
    ))
}

fn serialize_extra(extra: &Value) -> Option<String> {
    if extra.is_null() {
        return None;
    }
    // Serializing a `Value` cannot fail.
    serde_json::to_string(extra).ok()
}
