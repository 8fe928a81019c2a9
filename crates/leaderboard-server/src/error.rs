//! Error types for the leaderboard service binary.

/// Top-level error for start-up and shutdown.
///
/// Each variant wraps one subsystem so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: leaderboard_core::ConfigError,
    },

    /// A store could not be reached, migrated, or read during start-up.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: leaderboard_db::DbError,
    },

    /// The HTTP server failed to bind or crashed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: leaderboard_api::ServerError,
    },
}
