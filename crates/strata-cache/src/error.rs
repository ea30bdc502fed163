//! Error types for the cache-consistency layer.
//!
//! All adapter failures are propagated via [`CacheError`], which wraps the
//! underlying [`fred`] and [`sqlx`] errors. "Not found" is never an error
//! anywhere in this crate: lookups return `Option` or an empty list.

/// Errors that can occur in the cache-consistency layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The volatile cache is not ready and the operation has no durable fallback.
    #[error("cache not ready - cannot {operation} {key}")]
    Unavailable {
        /// What was attempted (`get`, `set`, `scan`, ...).
        operation: &'static str,
        /// Key or pattern involved.
        key: String,
    },

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A cached or stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Release of a design lock that nobody holds.
    #[error("cannot release design lock of {resource}: resource not locked")]
    LockNotHeld {
        /// Locked resource id.
        resource: String,
    },

    /// Release of a design lock by a user that does not own it.
    #[error("cannot release design lock of {resource}: not held by user {user}")]
    LockOwnerMismatch {
        /// Locked resource id.
        resource: String,
        /// User that attempted the release.
        user: String,
    },

    /// Flushing the cache was requested in an environment that forbids it.
    #[error("flush is not allowed in the {environment} environment")]
    FlushForbidden {
        /// Configured environment name.
        environment: String,
    },

    /// A customer or table name is not a valid durable-store identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Build an [`CacheError::Unavailable`] for `operation` on `key`.
    pub fn unavailable(operation: &'static str, key: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            key: key.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;
