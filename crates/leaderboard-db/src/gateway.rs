//! Gateway traits over the two stores.
//!
//! The leaderboard core only ever talks to [`FastStore`] and
//! [`DurableStore`]. The production implementations are
//! [`DragonflyPool`](crate::DragonflyPool) and
//! [`PostgresPool`](crate::PostgresPool); [`memory`](crate::memory) holds
//! in-process versions for tests and local runs.
//!
//! Gateways never retry. Every failure is surfaced as a [`DbError`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leaderboard_types::{
    EntryMetadata, LeaderboardConfig, LeaderboardKey, PlayerMeta, RankInfo, ScoreWrite,
    SortDirection, TenantId, WriteTask,
};

use crate::error::DbError;

/// TTL of a metadata blob in the fast store (7 days).
pub const METADATA_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// TTL of a cached configuration in the fast store (10 minutes).
pub const CONFIG_CACHE_TTL_SECS: i64 = 10 * 60;

/// Result of a fast-store write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Whether the write mode let the score through. When `false` neither
    /// the score nor the metadata blob was touched.
    pub changed: bool,
    /// The member's score after the write, before trimming.
    pub score: Option<i64>,
    /// Members removed by the cap trim, in losing-end order.
    pub evicted: Vec<String>,
    /// Version stamped on the change by the leaderboard's clock.
    pub version: i64,
}

/// Result of a fast-store removal or clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removal {
    /// Members removed.
    pub removed: u64,
    /// Version stamped on the change by the leaderboard's clock.
    pub version: i64,
}

/// One row of a per-tenant rank table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RankRow {
    /// Player identifier.
    pub player_id: String,
    /// Stored score.
    pub score: i64,
    /// Serialized `extraData`.
    pub extra_data: Option<String>,
    /// First insert time.
    pub created_at: DateTime<Utc>,
    /// Last upsert time.
    pub updated_at: DateTime<Utc>,
}

/// State of a row in the persisted write queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Waiting to be claimed by the writer.
    Pending,
    /// Parked after exhausting retries.
    Dead,
}

impl QueueStatus {
    /// The `status` column value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dead => "dead",
        }
    }
}

/// A task claimed from the persisted write queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWrite {
    /// Queue row id.
    pub id: i64,
    /// The task to apply.
    pub task: WriteTask,
    /// Attempts already made before the task was persisted.
    pub attempts: u32,
}

/// Hot-path store: sorted sets, metadata blobs, and the config cache.
#[async_trait]
pub trait FastStore: Send + Sync {
    /// Atomically write a member's score and metadata, trim the set to
    /// `cap` members from the losing end when `cap > 0` (dropping the
    /// evicted members' metadata), and stamp a version on the change.
    ///
    /// Metadata is only written when the write mode changed the score.
    async fn apply_write(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        write: ScoreWrite,
        metadata: &EntryMetadata,
        cap: u32,
        sort: SortDirection,
    ) -> Result<WriteOutcome, DbError>;

    /// Current score of a member.
    async fn read_score(&self, key: &LeaderboardKey, player_id: &str)
    -> Result<Option<i64>, DbError>;

    /// 1-based rank of a member under `sort`.
    async fn read_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<u64>, DbError>;

    /// Rank and score of a member, read atomically.
    async fn read_position(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        sort: SortDirection,
    ) -> Result<Option<RankInfo>, DbError>;

    /// Members at 0-based positions `start..=stop` under `sort`.
    async fn range_by_rank(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        start: u64,
        stop: u64,
    ) -> Result<Vec<(String, i64)>, DbError>;

    /// Scores and metadata of the given members. Members without a score
    /// are left out of the map.
    async fn read_metadata(
        &self,
        key: &LeaderboardKey,
        player_ids: &[String],
    ) -> Result<HashMap<String, PlayerMeta>, DbError>;

    /// Stored metadata blob of one member, if still present.
    async fn read_entry_metadata(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
    ) -> Result<Option<EntryMetadata>, DbError>;

    /// Number of members in the set.
    async fn cardinality(&self, key: &LeaderboardKey) -> Result<u64, DbError>;

    /// Remove a member and its metadata in one atomic step.
    async fn remove(&self, key: &LeaderboardKey, player_id: &str) -> Result<Removal, DbError>;

    /// Delete the set and the metadata of every member it held in one
    /// atomic step.
    async fn clear(&self, key: &LeaderboardKey) -> Result<Removal, DbError>;

    /// Cached configuration, if present.
    async fn cached_config(&self, key: &LeaderboardKey)
    -> Result<Option<LeaderboardConfig>, DbError>;

    /// Cache a configuration for [`CONFIG_CACHE_TTL_SECS`].
    async fn cache_config(&self, config: &LeaderboardConfig) -> Result<(), DbError>;

    /// Drop a cached configuration.
    async fn invalidate_config(&self, key: &LeaderboardKey) -> Result<(), DbError>;
}

/// Store of record: rank tables, profiles, configuration, and the
/// persisted write queue.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create the tenant's rank and profile tables if they do not exist.
    async fn provision_tenant(&self, tenant: &TenantId) -> Result<(), DbError>;

    /// Insert or update a rank row. `created_at` is preserved on update.
    ///
    /// Ignored when the row (live or deleted) already carries a version at
    /// or above `version`, or when the category was truncated at or above
    /// it.
    async fn upsert_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        score: i64,
        extra_data: Option<&str>,
        now: DateTime<Utc>,
        version: i64,
    ) -> Result<(), DbError>;

    /// Delete a rank row, leaving a tombstone at `version` so older upserts
    /// cannot bring it back. Deleting a missing row succeeds.
    async fn delete_rank(
        &self,
        key: &LeaderboardKey,
        player_id: &str,
        version: i64,
    ) -> Result<(), DbError>;

    /// Delete every rank row of the category older than `version` and raise
    /// the category's truncate watermark to it. Returns the live rows
    /// removed.
    async fn truncate_ranks(&self, key: &LeaderboardKey, version: i64) -> Result<u64, DbError>;

    /// One page of live rank rows ordered by score under `sort`, plus the
    /// live row count of the category.
    async fn page_ranks(
        &self,
        key: &LeaderboardKey,
        sort: SortDirection,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<RankRow>, u64), DbError>;

    /// Profile JSON documents of the given players. Missing players are
    /// absent from the map.
    async fn load_profiles(
        &self,
        tenant: &TenantId,
        player_ids: &[String],
    ) -> Result<HashMap<String, String>, DbError>;

    /// Configuration of one leaderboard. Tenants that share a safe id share
    /// their configurations.
    async fn get_config(&self, key: &LeaderboardKey)
    -> Result<Option<LeaderboardConfig>, DbError>;

    /// Every configuration of a tenant, ordered by category.
    async fn list_configs(&self, tenant: &TenantId) -> Result<Vec<LeaderboardConfig>, DbError>;

    /// Every enabled configuration across all tenants.
    async fn list_enabled_configs(&self) -> Result<Vec<LeaderboardConfig>, DbError>;

    /// Insert a configuration. Returns `false` if one already exists for the
    /// same safe id and category.
    async fn insert_config(&self, config: &LeaderboardConfig) -> Result<bool, DbError>;

    /// Overwrite a configuration. Returns `false` if none exists.
    async fn update_config(&self, config: &LeaderboardConfig) -> Result<bool, DbError>;

    /// Delete a configuration. Returns `false` if none existed.
    async fn delete_config(&self, key: &LeaderboardKey) -> Result<bool, DbError>;

    /// Set `last_reset_at` to `boundary` only if it still equals `previous`.
    /// Returns whether this caller won the update.
    async fn mark_reset(
        &self,
        key: &LeaderboardKey,
        previous: Option<DateTime<Utc>>,
        boundary: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Set `last_reset_at` back to `previous` only if it still equals
    /// `boundary`, returning the boundary to the scheduler after a failed
    /// reset.
    async fn restore_reset(
        &self,
        key: &LeaderboardKey,
        boundary: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError>;

    /// Persist a write task. Returns the queue row id.
    async fn enqueue_write(
        &self,
        task: &WriteTask,
        status: QueueStatus,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64, DbError>;

    /// Claim up to `limit` pending tasks due at `now`, leasing them until
    /// `lease_until` so no other consumer takes them.
    async fn claim_writes(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueuedWrite>, DbError>;

    /// Delete a queue row after its task was applied.
    async fn complete_write(&self, id: i64) -> Result<(), DbError>;

    /// Park a queue row in the dead-letter state.
    async fn bury_write(&self, id: i64, attempts: u32) -> Result<(), DbError>;

    /// Move every dead-letter row back to pending, due at `now` with its
    /// attempt count reset. Returns the rows moved.
    async fn requeue_dead_writes(&self, now: DateTime<Utc>) -> Result<u64, DbError>;

    /// Number of dead-letter rows.
    async fn count_dead_writes(&self) -> Result<u64, DbError>;
}
