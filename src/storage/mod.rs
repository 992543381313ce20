//! Chunk storage read side
//!
//! This module provides everything below the cache client:
//!
//! - **types**: Time arithmetic, chunk descriptors, merged series
//! - **reader**: The `ChunkReader` contract, merge step and fill policies
//! - **chunk**: Chunk file format and the file-backed reader
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Read Path:
//!   ChunkDescriptor → ChunkReader → decode → merge_series → MergeSink
//! ```

pub mod chunk;
pub mod error;
pub mod reader;
pub mod types;

// Re-export commonly used types
pub use chunk::{ChunkFile, ChunkFileReader, ChunkHeader, StoredSeries};
pub use error::{ChunkError, ChunkResult};
pub use reader::{fill, merge_series, ChunkReader, ChunkSeries, FillFn, MergeSink};
pub use types::{
    points_between, ChunkDescriptor, Interval, Labels, MetricValues, SeriesKey, Timestamp,
};
