//! Shared types for the multi-tenant leaderboard engine.
//!
//! This crate has no I/O. It defines the vocabulary that the data layer
//! (`leaderboard-db`), the engine (`leaderboard-core`) and the HTTP surface
//! (`leaderboard-api`) exchange:
//!
//! - [`tenant`] -- tenant identifier sanitizing and storage naming
//! - [`config`] -- leaderboard configuration (sort, update policy, cap)
//! - [`schedule`] -- reset schedules, cron parsing, reset-boundary arithmetic
//! - [`entry`] -- ranked entries, per-entry metadata, durable-write tasks
//! - [`profile`] -- player profiles and the projected leaderboard view

pub mod config;
pub mod entry;
pub mod profile;
pub mod schedule;
pub mod tenant;

// Re-export primary types for convenience.
pub use config::{ConfigPatch, LeaderboardConfig, NewLeaderboard, ParseEnumError, SortDirection, UpdatePolicy};
pub use entry::{
    EntryMetadata, MAX_SCORE_MAGNITUDE, PlayerMeta, RankInfo, RankedEntry, ScoreWrite, SubmitResult, WriteOp,
    WriteTask, is_exact_score,
};
pub use profile::{LeaderboardView, Profile};
pub use schedule::{CronSchedule, ResetSchedule, ScheduleError};
pub use tenant::{KeyError, LeaderboardKey, TenantId, safe_id, validate_category, validate_player};
