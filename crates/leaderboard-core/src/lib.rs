//! The leaderboard engine.
//!
//! Sits between the thin request surface and the two store gateways of
//! `leaderboard-db`:
//!
//! ```text
//!   leaderboard-api ──► Leaderboard ──► ConfigResolver ──► FastStore (cache) / DurableStore
//!                           │
//!                           ├──► policy::decide ──► FastStore::apply_write
//!                           ├──► Projector ──► DurableStore::load_profiles
//!                           └──► DurableWriter ──► DurableStore (ranks, write queue)
//!
//!   ResetScheduler ──► Leaderboard::reset ──► mark_reset (CAS) ──► clear
//! ```
//!
//! # Modules
//!
//! - [`alerts`] -- bounded operator alert log.
//! - [`config`] -- `leaderboard.yaml` loading into typed sections.
//! - [`deadline`] -- deadline and cancellation guard for store calls.
//! - [`engine`] -- [`Leaderboard`], the game and admin operations.
//! - [`error`] -- [`LeaderboardError`] with stable numeric codes.
//! - [`policy`] -- update-policy decision (`max`, `latest`, `sum`).
//! - [`projector`] -- joins ranked entries with metadata and profiles.
//! - [`resolver`] -- configuration read-through cache.
//! - [`retry`] -- jittered exponential backoff.
//! - [`scheduler`] -- periodic schedule-driven resets.
//! - [`writer`] -- durable-write lanes, spill queue, and dead letters.

pub mod alerts;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod policy;
pub mod projector;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod writer;

pub use alerts::{Alert, AlertCategory, AlertLog, AlertSeverity};
pub use config::{ConfigError, ServiceConfig};
pub use deadline::Deadlines;
pub use engine::{DurablePage, DurableRow, Leaderboard, RebuildReport};
pub use error::LeaderboardError;
pub use retry::RetryPolicy;
pub use scheduler::{ResetScheduler, TickReport};
pub use writer::DurableWriter;
