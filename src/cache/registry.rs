//! Cache Registry - project id → project store
//!
//! The registry is the single shared mutable root of the cache. One
//! reader/writer lock guards the shape of the whole index: which projects,
//! queries and chunks exist. Readers hold it only while resolving chunk
//! descriptors, never across chunk I/O.
//!
//! Mutation belongs to the chunk writer. Every writer method builds a new
//! `QueryIndex` and swaps it in under the write lock, so a reader sees either
//! the old chunk set or the new one, never a mix.

use crate::cache::client::QueryClient;
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::freshness::{FreshnessSource, StatusSource};
use crate::cache::ProjectId;
use crate::collections::ShardedMap;
use crate::config::CacheConfig;
use crate::index::{ProjectStore, QueryFingerprint, QueryIndex};
use crate::storage::{ChunkDescriptor, ChunkReader, Interval, MergeSink};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tunables of the registry
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Shard count of each query's merge sink
    pub merge_shards: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { merge_shards: 1 }
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            merge_shards: config.merge_shards,
        }
    }
}

/// Size of the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub projects: usize,
    pub queries: usize,
    pub chunks: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects={}, queries={}, chunks={}",
            self.projects, self.queries, self.chunks
        )
    }
}

/// Process-wide cache registry
pub struct Cache {
    /// project → store
    projects: RwLock<HashMap<ProjectId, ProjectStore>>,
    reader: Arc<dyn ChunkReader>,
    freshness: Arc<dyn FreshnessSource>,
    status: Arc<dyn StatusSource>,
    options: CacheOptions,
}

impl Cache {
    /// Create an empty registry
    pub fn new(
        reader: Arc<dyn ChunkReader>,
        freshness: Arc<dyn FreshnessSource>,
        status: Arc<dyn StatusSource>,
    ) -> Self {
        Self::with_options(reader, freshness, status, CacheOptions::default())
    }

    /// Create with custom options
    pub fn with_options(
        reader: Arc<dyn ChunkReader>,
        freshness: Arc<dyn FreshnessSource>,
        status: Arc<dyn StatusSource>,
        options: CacheOptions,
    ) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            reader,
            freshness,
            status,
            options,
        }
    }

    /// Read-side handle bound to one project. Allocates no shared state.
    pub fn client(&self, project: impl Into<ProjectId>) -> QueryClient<'_> {
        QueryClient::new(self, project.into())
    }

    // ==================== Read Methods ====================

    /// Copy of a project's store, if registered
    pub async fn lookup(&self, project: &ProjectId) -> Option<ProjectStore> {
        self.projects.read().await.get(project).cloned()
    }

    /// Run `f` against a project's store under the read lock
    pub(crate) async fn with_project<R>(
        &self,
        project: &ProjectId,
        f: impl FnOnce(&ProjectStore) -> R,
    ) -> CacheResult<R> {
        let projects = self.projects.read().await;
        projects
            .get(project)
            .map(f)
            .ok_or_else(|| CacheError::UnknownProject(project.clone()))
    }

    pub(crate) fn reader(&self) -> &dyn ChunkReader {
        self.reader.as_ref()
    }

    pub(crate) fn freshness(&self) -> &dyn FreshnessSource {
        self.freshness.as_ref()
    }

    pub(crate) fn status_source(&self) -> &dyn StatusSource {
        self.status.as_ref()
    }

    /// Fresh aggregation structure for one query
    pub(crate) fn new_sink(&self) -> MergeSink {
        if self.options.merge_shards <= 1 {
            MergeSink::single()
        } else {
            MergeSink::new(self.options.merge_shards, |key| key.0 as usize)
        }
    }

    /// All registered project ids, sorted
    pub async fn project_ids(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.projects.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stats(&self) -> CacheStats {
        let projects = self.projects.read().await;
        CacheStats {
            projects: projects.len(),
            queries: projects.values().map(|p| p.query_count()).sum(),
            chunks: projects.values().map(|p| p.chunk_count()).sum(),
        }
    }

    // ==================== Writer Methods ====================

    /// Register a project, or update the default step of a known one
    ///
    /// Returns `true` if the project was new.
    pub async fn register_project(&self, project: impl Into<ProjectId>, step: Interval) -> bool {
        let project = project.into();
        let mut projects = self.projects.write().await;
        match projects.get_mut(&project) {
            Some(store) => {
                store.set_step(step);
                false
            }
            None => {
                tracing::debug!(project = %project, step = step.0, "Project registered");
                projects.insert(project, ProjectStore::new(step));
                true
            }
        }
    }

    /// Drop a project and every index it owns
    pub async fn remove_project(&self, project: &ProjectId) -> bool {
        let removed = self.projects.write().await.remove(project).is_some();
        if removed {
            tracing::debug!(project = %project, "Project removed");
        }
        removed
    }

    /// Publish chunks for a query, creating its index on first use
    ///
    /// Returns the number of chunks in the query's index afterwards.
    pub async fn publish_chunks<I>(
        &self,
        project: &ProjectId,
        query: &str,
        step: Interval,
        chunks: I,
    ) -> CacheResult<usize>
    where
        I: IntoIterator<Item = ChunkDescriptor>,
    {
        let fingerprint = QueryFingerprint::of(query);
        let mut projects = self.projects.write().await;
        let store = projects
            .get_mut(project)
            .ok_or_else(|| CacheError::UnknownProject(project.clone()))?;

        let next = match store.query(&fingerprint) {
            Some(current) => current.with_chunks(step, chunks),
            None => QueryIndex::new(step).with_chunks(step, chunks),
        };
        let count = next.len();
        store.replace_query(fingerprint, next);

        tracing::debug!(
            project = %project,
            query = %fingerprint,
            chunks = count,
            "Chunks published"
        );
        Ok(count)
    }

    /// Remove one chunk from a query's index
    ///
    /// Returns `false` if the query or chunk was not indexed.
    pub async fn evict_chunk(
        &self,
        project: &ProjectId,
        query: &str,
        path: &Path,
    ) -> CacheResult<bool> {
        let fingerprint = QueryFingerprint::of(query);
        let mut projects = self.projects.write().await;
        let store = projects
            .get_mut(project)
            .ok_or_else(|| CacheError::UnknownProject(project.clone()))?;

        let Some(current) = store.query(&fingerprint) else {
            return Ok(false);
        };
        if current.get(path).is_none() {
            return Ok(false);
        }

        let next = current.without_chunk(path);
        if next.is_empty() {
            store.remove_query(&fingerprint);
        } else {
            store.replace_query(fingerprint, next);
        }

        tracing::debug!(
            project = %project,
            query = %fingerprint,
            path = %path.display(),
            "Chunk evicted"
        );
        Ok(true)
    }
}
