//! Chunk storage error types
//!
//! Defines all errors that can occur while reading or writing chunk files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the chunk storage layer
#[derive(Error, Debug)]
pub enum ChunkError {
    /// I/O operation failed
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch, truncated file)
    #[error("Corrupt chunk {path:?}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// File is not a chunk or has an unsupported version
    #[error("Invalid chunk format: {0}")]
    InvalidFormat(String),
}

impl ChunkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChunkError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ChunkError::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for ChunkError {
    fn from(err: bincode::Error) -> Self {
        ChunkError::Serialization(err.to_string())
    }
}

/// Result type alias for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;
