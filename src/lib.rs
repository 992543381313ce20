//! # rangecache
//!
//! Read path of a time-series range-query cache: answers "series X over
//! `[from, to]` at step S" by merging previously materialized, immutable
//! on-disk chunks.
//!
//! ## Features
//!
//! - **Overlap resolution**: chunks are merged oldest-first, so the most
//!   recently created chunk wins wherever chunks overlap
//! - **Grid alignment**: results sit on a step-aligned grid with caller-chosen gap filling
//! - **Freshness bound**: `get_to` never exposes a step whose ingestion may be incomplete
//! - **Concurrency**: one reader/writer lock over the index shape, never held across chunk I/O
//!
//! ## Modules
//!
//! - [`cache`]: Registry, query client, freshness signals
//! - [`index`]: Query fingerprints and chunk indices
//! - [`storage`]: Chunk file format, chunk reader contract, merge step
//! - [`collections`]: Sharded and single-lock concurrent maps
//! - [`config`]: TOML configuration with environment overrides

pub mod cache;
pub mod collections;
pub mod config;
pub mod index;
pub mod storage;

// Re-export top-level types for convenience
pub use cache::{
    Cache, CacheError, CacheOptions, CacheResult, CacheStats, FreshnessSource, ProjectId,
    QueryClient, QueryContext, Status, StatusSource, UpdateTracker,
};

pub use collections::{LockedMap, ShardedMap};

pub use config::{CacheConfig, Config, ConfigError, LoggingConfig};

pub use index::{ProjectStore, QueryFingerprint, QueryIndex};

pub use storage::{
    fill, ChunkDescriptor, ChunkError, ChunkFile, ChunkFileReader, ChunkReader, FillFn, Interval,
    Labels, MergeSink, MetricValues, SeriesKey, Timestamp,
};
