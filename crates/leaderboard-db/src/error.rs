//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors. The gateways never retry; callers decide.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row held a value the domain types reject.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A per-tenant table does not exist (tenant not provisioned).
    #[error("Table not found: {0}")]
    MissingTable(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether the failure is a transport, pool, or availability problem
    /// (as opposed to bad data).
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Postgres(_) | Self::Dragonfly(_) | Self::Unavailable(_) | Self::MissingTable(_)
        )
    }
}
