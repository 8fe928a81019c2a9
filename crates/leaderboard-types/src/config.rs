//! Leaderboard configuration.
//!
//! A configuration must exist before any score can be submitted for its
//! `(tenant, category)`. The sort direction is the single source of truth
//! both for ordering and for what counts as a "better" score under the
//! [`UpdatePolicy::Max`] policy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::ResetSchedule;
use crate::tenant::{LeaderboardKey, TenantId};

/// An enum column held a value outside its known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct ParseEnumError {
    /// Which enum failed to parse.
    pub kind: &'static str,
    /// The rejected text.
    pub value: String,
}

/// Ordering of a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Lower scores rank first.
    Asc,
    /// Higher scores rank first.
    #[default]
    Desc,
}

impl SortDirection {
    /// Database string for this direction.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// Whether `candidate` ranks strictly ahead of `current`.
    pub const fn is_better(self, candidate: i64, current: i64) -> bool {
        match self {
            Self::Asc => candidate < current,
            Self::Desc => candidate > current,
        }
    }
}

impl FromStr for SortDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(ParseEnumError {
                kind: "sort",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a new submission combines with the player's current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Keep the best score seen (per the sort direction).
    #[default]
    Max,
    /// Always replace with the latest submission.
    Latest,
    /// Add the submission to the current score.
    Sum,
}

impl UpdatePolicy {
    /// Database string for this policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Latest => "latest",
            Self::Sum => "sum",
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "latest" => Ok(Self::Latest),
            "sum" => Ok(Self::Sum),
            _ => Err(ParseEnumError {
                kind: "update_policy",
                value: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The policy object for one `(tenant, category)` leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardConfig {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Category within the tenant.
    pub category: String,
    /// Display name.
    pub name: String,
    /// Ordering direction.
    pub sort: SortDirection,
    /// Update policy for repeat submissions.
    pub update_policy: UpdatePolicy,
    /// Maximum retained entries; `0` means unbounded.
    pub cap: u32,
    /// Automatic reset schedule.
    pub reset_schedule: ResetSchedule,
    /// Disabled leaderboards reject submissions.
    pub enabled: bool,
    /// Boundary of the most recent scheduled reset.
    pub last_reset_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardConfig {
    /// Build a fresh configuration from an admin request.
    pub fn from_request(tenant: TenantId, request: NewLeaderboard, now: DateTime<Utc>) -> Self {
        let name = if request.name.is_empty() {
            request.category.clone()
        } else {
            request.name
        };
        Self {
            tenant,
            category: request.category,
            name,
            sort: request.sort,
            update_policy: request.update_policy,
            cap: request.cap,
            reset_schedule: request.reset_schedule,
            enabled: request.enabled,
            last_reset_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The `(tenant, category)` key this configuration governs.
    pub fn key(&self) -> LeaderboardKey {
        LeaderboardKey {
            tenant: self.tenant.clone(),
            category: self.category.clone(),
        }
    }

    /// Whether the leaderboard retains a bounded number of entries.
    pub const fn is_capped(&self) -> bool {
        self.cap > 0
    }

    /// The time the reset scheduler measures boundaries from.
    pub fn reset_reference(&self) -> DateTime<Utc> {
        self.last_reset_at.unwrap_or(self.created_at)
    }
}

/// Admin request to create a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLeaderboard {
    /// Category name (validated by the caller).
    pub category: String,
    /// Display name; defaults to the category.
    #[serde(default)]
    pub name: String,
    /// Ordering direction (default `desc`).
    #[serde(default)]
    pub sort: SortDirection,
    /// Update policy (default `max`).
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Entry cap (default unbounded).
    #[serde(default)]
    pub cap: u32,
    /// Reset schedule (default `permanent`).
    #[serde(default)]
    pub reset_schedule: ResetSchedule,
    /// Whether submissions are accepted (default `true`).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

/// Admin request to change selected fields of a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    /// New display name.
    pub name: Option<String>,
    /// New ordering direction.
    pub sort: Option<SortDirection>,
    /// New update policy.
    pub update_policy: Option<UpdatePolicy>,
    /// New cap.
    pub cap: Option<u32>,
    /// New reset schedule.
    pub reset_schedule: Option<ResetSchedule>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

impl ConfigPatch {
    /// Apply the patch, bumping `updated_at`.
    pub fn apply(self, config: &mut LeaderboardConfig, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(sort) = self.sort {
            config.sort = sort;
        }
        if let Some(policy) = self.update_policy {
            config.update_policy = policy;
        }
        if let Some(cap) = self.cap {
            config.cap = cap;
        }
        if let Some(schedule) = self.reset_schedule {
            config.reset_schedule = schedule;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        config.updated_at = now;
    }
}
