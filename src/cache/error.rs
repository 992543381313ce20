//! Cache error types
//!
//! Defines all error conditions a query client can surface.

use crate::cache::ProjectId;
use crate::storage::ChunkError;
use thiserror::Error;

/// Errors that can occur during cache queries
#[derive(Error, Debug)]
pub enum CacheError {
    /// The registry has no entry for the project
    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    /// A chunk read failed; the whole query is aborted
    #[error(transparent)]
    ChunkRead(#[from] ChunkError),

    /// The caller cancelled the query
    #[error("query cancelled")]
    Cancelled,

    /// The caller's deadline passed before the merge finished
    #[error("query deadline exceeded")]
    DeadlineExceeded,

    /// Range or step violates the query preconditions
    #[error("invalid query range: {0}")]
    InvalidRange(String),

    /// The freshness signal could not be computed
    #[error("freshness signal failed: {0}")]
    Freshness(String),

    /// The status signal could not be computed
    #[error("status signal failed: {0}")]
    Status(String),
}

impl CacheError {
    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::ChunkRead(ChunkError::Io { .. })
                | CacheError::Freshness(_)
                | CacheError::Status(_)
        )
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
