//! Chunk index structures
//!
//! - **QueryFingerprint**: stable key of a query's text
//! - **QueryIndex**: chunk set + nominal step of one query
//! - **ProjectStore**: query indices of one project + default step
//!
//! # Architecture
//!
//! ```text
//! ProjectId ──► ProjectStore
//!                  │  fingerprint(query)
//!                  ▼
//!               QueryIndex ──► [ChunkDescriptor, ...] ──► chunk files
//! ```
//!
//! Query indices are shared as `Arc<QueryIndex>` and replaced wholesale on
//! update, never edited in place.

mod fingerprint;
mod project;
mod query_index;

pub use fingerprint::QueryFingerprint;
pub use project::ProjectStore;
pub use query_index::QueryIndex;
