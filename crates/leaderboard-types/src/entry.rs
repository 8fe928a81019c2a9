//! Ranked entries, per-entry metadata, and durable-write tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SortDirection;
use crate::tenant::{LeaderboardKey, TenantId};

/// Largest score magnitude (2^53) that a sorted-set double stores exactly.
pub const MAX_SCORE_MAGNITUDE: i64 = 9_007_199_254_740_992;

/// Whether `score` survives the round trip through a sorted set.
pub const fn is_exact_score(score: i64) -> bool {
    score >= -MAX_SCORE_MAGNITUDE && score <= MAX_SCORE_MAGNITUDE
}

/// Per-entry metadata stored next to the sorted set as an opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Game-specific fields attached to the submission.
    #[serde(default)]
    pub extra_data: Value,
    /// When the entry was first accepted.
    pub created_at: DateTime<Utc>,
    /// When the entry was last accepted.
    pub updated_at: DateTime<Utc>,
}

/// Merged view of a member's score and metadata blob.
///
/// The timestamps are `None` when the metadata blob has expired or was
/// never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMeta {
    /// Current score in the sorted set.
    pub score: i64,
    /// Game-specific fields, `null` if unknown.
    #[serde(default)]
    pub extra_data: Value,
    /// First acceptance time.
    pub created_at: Option<DateTime<Utc>>,
    /// Latest acceptance time.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One row of a rank range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    /// 1-based rank.
    pub rank: u64,
    /// Player identifier.
    pub player_id: String,
    /// Score.
    pub score: i64,
}

/// A player's position on a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInfo {
    /// 1-based rank under the configured sort direction.
    pub rank: u64,
    /// Current score.
    pub score: i64,
}

/// Outcome of a score submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    /// Whether the update policy accepted the submission.
    pub accepted: bool,
    /// Score held after the call: the new score when accepted, the
    /// unchanged current score otherwise.
    pub score: Option<i64>,
    /// Current rank, reported only for rejected submissions.
    pub rank: Option<u64>,
    /// Players trimmed from the leaderboard by the cap. May contain the
    /// submitter.
    pub evicted_players: Vec<String>,
}

/// How the fast store should combine a score with the member's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreWrite {
    /// Overwrite unconditionally.
    Set(i64),
    /// Add to the current score (absent counts as zero).
    Increment(i64),
    /// Overwrite only if the score ranks ahead of the current one.
    Improve {
        /// Proposed score.
        score: i64,
        /// Direction that defines "ahead".
        sort: SortDirection,
    },
    /// Write only if the member is absent. Metadata is written the same way.
    IfAbsent(i64),
}

/// The durable-store change a task applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    /// Insert or update a player's row.
    Upsert {
        /// Player identifier.
        player_id: String,
        /// Score to store.
        score: i64,
        /// Serialized `extraData` JSON.
        extra_data: Option<String>,
        /// Acceptance time; becomes `updated_at` (and `created_at` on insert).
        at: DateTime<Utc>,
    },
    /// Delete a player's row.
    Delete {
        /// Player identifier.
        player_id: String,
    },
    /// Delete every row of the category.
    Truncate,
}

impl WriteOp {
    /// Queue-table `op` column value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
            Self::Truncate => "truncate",
        }
    }

    /// The player this operation targets, if any.
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::Upsert { player_id, .. } | Self::Delete { player_id } => Some(player_id),
            Self::Truncate => None,
        }
    }
}

/// A durable-store write emitted by the engine and applied out of band.
///
/// Tasks are idempotent and carry the version the fast store stamped on the
/// change. The durable store drops a task older than what a row (or the
/// category's last truncate) already reflects, so tasks may be applied in
/// any order and any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTask {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Category within the tenant.
    pub category: String,
    /// The change to apply.
    pub op: WriteOp,
    /// Fast-store version of the change, in microseconds.
    #[serde(default)]
    pub version: i64,
}

impl WriteTask {
    /// Upsert task for an accepted submission.
    pub fn upsert(
        key: &LeaderboardKey,
        player_id: &str,
        score: i64,
        extra_data: Option<String>,
        at: DateTime<Utc>,
        version: i64,
    ) -> Self {
        Self::new(
            key,
            WriteOp::Upsert {
                player_id: player_id.to_owned(),
                score,
                extra_data,
                at,
            },
            version,
        )
    }

    /// Delete task for a removed or evicted player.
    pub fn delete(key: &LeaderboardKey, player_id: &str, version: i64) -> Self {
        Self::new(
            key,
            WriteOp::Delete {
                player_id: player_id.to_owned(),
            },
            version,
        )
    }

    /// Truncate task for a cleared leaderboard.
    pub fn truncate(key: &LeaderboardKey, version: i64) -> Self {
        Self::new(key, WriteOp::Truncate, version)
    }

    fn new(key: &LeaderboardKey, op: WriteOp, version: i64) -> Self {
        Self {
            tenant: key.tenant.clone(),
            category: key.category.clone(),
            op,
            version,
        }
    }

    /// The leaderboard this task belongs to.
    pub fn key(&self) -> LeaderboardKey {
        LeaderboardKey {
            tenant: self.tenant.clone(),
            category: self.category.clone(),
        }
    }
}
