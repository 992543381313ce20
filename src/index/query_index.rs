//! Query Index - the known chunks of one (project, query) pair
//!
//! A `QueryIndex` is never mutated once shared. Writers build a new index
//! with [`QueryIndex::with_chunks`] or [`QueryIndex::without_chunk`] and swap
//! it into the registry, so readers always see a complete chunk set.

use crate::storage::{ChunkDescriptor, Interval, Timestamp};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Chunk set of one query plus its nominal step
#[derive(Debug, Clone, Default)]
pub struct QueryIndex {
    /// path → chunk
    chunks: HashMap<PathBuf, ChunkDescriptor>,
    /// Nominal sampling step of the query
    step: Interval,
}

impl QueryIndex {
    pub fn new(step: Interval) -> Self {
        Self {
            chunks: HashMap::new(),
            step,
        }
    }

    pub fn step(&self) -> Interval {
        self.step
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&ChunkDescriptor> {
        self.chunks.get(path)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.values()
    }

    /// New index with `chunks` added. A chunk with a known path replaces the old entry.
    pub fn with_chunks<I>(&self, step: Interval, chunks: I) -> Self
    where
        I: IntoIterator<Item = ChunkDescriptor>,
    {
        let mut next = self.chunks.clone();
        for chunk in chunks {
            next.insert(chunk.path.clone(), chunk);
        }
        Self { chunks: next, step }
    }

    /// New index without the chunk at `path`
    pub fn without_chunk(&self, path: &Path) -> Self {
        let mut next = self.chunks.clone();
        next.remove(path);
        Self {
            chunks: next,
            step: self.step,
        }
    }

    /// Chunks intersecting `[from, to]`, oldest first
    ///
    /// Ties on `created` are broken by path so the order is deterministic.
    pub fn overlapping(&self, from: Timestamp, to: Timestamp) -> Vec<ChunkDescriptor> {
        let mut hits: Vec<ChunkDescriptor> = self
            .chunks
            .values()
            .filter(|c| c.intersects(from, to))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        hits
    }

    /// Largest step among chunks intersecting `[from, to]`
    pub fn coarsest_step(&self, from: Timestamp, to: Timestamp) -> Option<Interval> {
        self.chunks
            .values()
            .filter(|c| c.intersects(from, to))
            .map(|c| c.step)
            .max()
    }
}
