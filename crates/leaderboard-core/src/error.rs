//! Error taxonomy of the leaderboard engine.
//!
//! Every failure that crosses the engine boundary is a [`LeaderboardError`]
//! carrying a stable numeric code. The HTTP surface copies the code into
//! the `{code, msg, data}` envelope unchanged; `0` is reserved for success.

use leaderboard_db::DbError;
use leaderboard_types::{KeyError, ScheduleError};

/// Errors returned by the leaderboard engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaderboardError {
    /// The tenant identifier is empty or sanitizes to nothing.
    #[error("invalid tenant: {0}")]
    InvalidTenant(String),

    /// No configuration exists for the leaderboard.
    #[error("leaderboard {0} is not configured")]
    ConfigMissing(String),

    /// The leaderboard exists but does not accept submissions.
    #[error("leaderboard {0} is disabled")]
    Disabled(String),

    /// A backing store could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A store call did not finish within its deadline.
    #[error("{operation} exceeded its {timeout_ms} ms deadline")]
    DeadlineExceeded {
        /// The store call that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A request argument is out of range (category, player, rank window).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration value cannot be used (schedule, enum string).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A leaderboard with the same key already exists.
    #[error("leaderboard {0} already exists")]
    ConfigExists(String),
}

impl LeaderboardError {
    /// Stable numeric code reported to clients.
    pub const fn code(&self) -> u32 {
        match self {
            Self::InvalidTenant(_) => 1001,
            Self::ConfigMissing(_) => 1002,
            Self::Disabled(_) => 1003,
            Self::StoreUnavailable(_) => 1004,
            Self::SerializationError(_) => 1005,
            Self::DeadlineExceeded { .. } => 1006,
            Self::Cancelled => 1007,
            Self::InvalidArgument(_) => 1008,
            Self::InvalidConfig(_) => 1009,
            Self::ConfigExists(_) => 1010,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::DeadlineExceeded { .. }
        )
    }
}

impl From<DbError> for LeaderboardError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Serialization(_) | DbError::InvalidData(_) => {
                Self::SerializationError(err.to_string())
            }
            DbError::Postgres(_)
            | DbError::Migration(_)
            | DbError::Dragonfly(_)
            | DbError::MissingTable(_)
            | DbError::Unavailable(_)
            | DbError::Config(_) => Self::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<KeyError> for LeaderboardError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidTenant(_) => Self::InvalidTenant(err.to_string()),
            KeyError::InvalidCategory(_) | KeyError::InvalidPlayer(_) => {
                Self::InvalidArgument(err.to_string())
            }
        }
    }
}

impl From<ScheduleError> for LeaderboardError {
    fn from(err: ScheduleError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LeaderboardError::InvalidTenant(String::new()).code(), 1001);
        assert_eq!(LeaderboardError::ConfigMissing(String::new()).code(), 1002);
        assert_eq!(LeaderboardError::Disabled(String::new()).code(), 1003);
        assert_eq!(LeaderboardError::StoreUnavailable(String::new()).code(), 1004);
        assert_eq!(LeaderboardError::SerializationError(String::new()).code(), 1005);
        assert_eq!(
            LeaderboardError::DeadlineExceeded {
                operation: "read_score",
                timeout_ms: 3000
            }
            .code(),
            1006
        );
        assert_eq!(LeaderboardError::Cancelled.code(), 1007);
        assert_eq!(LeaderboardError::ConfigExists(String::new()).code(), 1010);
    }

    #[test]
    fn db_errors_split_into_store_and_serialization() {
        let offline = LeaderboardError::from(DbError::Unavailable("fast store offline".into()));
        assert!(matches!(offline, LeaderboardError::StoreUnavailable(_)));
        assert!(offline.is_retryable());

        let corrupt = LeaderboardError::from(DbError::InvalidData("bad row".into()));
        assert!(matches!(corrupt, LeaderboardError::SerializationError(_)));
        assert!(!corrupt.is_retryable());

        let missing = LeaderboardError::from(DbError::MissingTable("ranks_x".into()));
        assert!(matches!(missing, LeaderboardError::StoreUnavailable(_)));
    }
}
