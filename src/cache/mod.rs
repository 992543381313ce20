//! Range-query cache read path
//!
//! - **registry**: Process-wide project → store map, plus the writer API
//! - **client**: Per-project read handle (`query_range`, `get_step`, `get_to`, `get_status`)
//! - **freshness**: Freshness and status signals, and an in-process tracker
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use rangecache::cache::{Cache, ProjectId, UpdateTracker};
//! use rangecache::storage::{fill, ChunkFileReader, Interval, Timestamp};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = Arc::new(UpdateTracker::new());
//! let cache = Cache::new(Arc::new(ChunkFileReader::new()), tracker.clone(), tracker);
//! cache.register_project("prod", Interval::seconds(30)).await;
//!
//! let client = cache.client("prod");
//! let to = client.get_to().await?;
//! let step = client.get_step(Timestamp(0), to).await?;
//! let series = client
//!     .query_range("up", Timestamp(0), to, step, &*fill::nan())
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod freshness;
mod registry;

pub use client::{QueryClient, QueryContext};
pub use error::{CacheError, CacheResult};
pub use freshness::{FreshnessSource, Status, StatusSource, UpdateTracker};
pub use registry::{Cache, CacheOptions, CacheStats};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable identifier of a tenant project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        ProjectId(id.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        ProjectId(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
