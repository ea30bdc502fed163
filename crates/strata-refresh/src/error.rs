//! Error types for the `strata-refresh` binary.

/// Top-level error for the operator CLI.
///
/// Each variant wraps a subsystem error so that `main` can propagate any
/// failure with `?`.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: strata_cache::ConfigError,
    },

    /// A cache layer operation failed.
    #[error("cache error: {source}")]
    Cache {
        /// The underlying cache error.
        #[from]
        source: strata_cache::CacheError,
    },

    /// Writing the JSON report failed.
    #[error("output error: {source}")]
    Output {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
