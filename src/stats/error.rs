//! Storage library error types
//!
//! Driver errors keep the engine's own message so missing-table
//! signatures survive up to the setup guidance.

use thiserror::Error;

/// Errors raised by the time-series access library and its drivers
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Sql(#[from] sqlx::Error),

    #[error("{0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Stored payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Granularity string that cannot be bucketed
    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),

    /// Invalid driver or library configuration
    #[error("{0}")]
    Config(String),

    /// Requested range would produce too many buckets
    #[error("{0}")]
    Range(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

/// Result type alias for storage library operations
pub type StatsResult<T> = Result<T, StatsError>;
