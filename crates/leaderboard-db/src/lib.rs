//! Data layer for the leaderboard engine (`Dragonfly` + `PostgreSQL`).
//!
//! `Dragonfly` is the fast store: live sorted sets, per-entry metadata
//! blobs, and the configuration cache. `PostgreSQL` is the store of record:
//! per-tenant rank and profile tables, leaderboard configuration, and the
//! persisted durable-write queue.
//!
//! # Architecture
//!
//! ```text
//! Leaderboard core
//!     |
//!     +-- hot path -----------> FastStore    (DragonflyPool | MemoryFastStore)
//!     |
//!     +-- store of record ----> DurableStore (PostgresPool  | MemoryDurableStore)
//!         |-- RankStore        (ranks_<tenant>)
//!         |-- ProfileStore     (player_<tenant>)
//!         |-- ConfigStore      (leaderboard_config)
//!         +-- WriteQueueStore  (leaderboard_write_queue)
//! ```
//!
//! # Modules
//!
//! - [`gateway`] -- `FastStore` / `DurableStore` traits and shared row types
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) fast store
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`rank_store`] -- Per-tenant rank tables
//! - [`profile_store`] -- Per-tenant profile tables
//! - [`config_store`] -- Leaderboard configuration rows
//! - [`write_queue`] -- Persisted durable-write queue
//! - [`memory`] -- In-process gateways for tests and local runs
//! - [`error`] -- Shared error types

pub mod config_store;
pub mod dragonfly;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod postgres;
pub mod profile_store;
pub mod rank_store;
pub mod write_queue;

// Re-export primary types for convenience.
pub use config_store::{ConfigRow, ConfigStore};
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use gateway::{
    CONFIG_CACHE_TTL_SECS, DurableStore, FastStore, METADATA_TTL_SECS, QueueStatus, QueuedWrite,
    RankRow, Removal, WriteOutcome,
};
pub use memory::{MemoryDurableStore, MemoryFastStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use profile_store::ProfileStore;
pub use rank_store::RankStore;
pub use write_queue::{QueueRow, WriteQueueStore};
