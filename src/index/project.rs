//! Project Store - all query indices of one project

use crate::index::{QueryFingerprint, QueryIndex};
use crate::storage::{Interval, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-project collection of query indices keyed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    queries: HashMap<QueryFingerprint, Arc<QueryIndex>>,
    /// Project-level default step
    step: Interval,
}

impl ProjectStore {
    pub fn new(step: Interval) -> Self {
        Self {
            queries: HashMap::new(),
            step,
        }
    }

    pub fn step(&self) -> Interval {
        self.step
    }

    pub fn set_step(&mut self, step: Interval) {
        self.step = step;
    }

    pub fn query(&self, fingerprint: &QueryFingerprint) -> Option<Arc<QueryIndex>> {
        self.queries.get(fingerprint).cloned()
    }

    /// Swap in a complete index for a query
    pub fn replace_query(&mut self, fingerprint: QueryFingerprint, index: QueryIndex) {
        self.queries.insert(fingerprint, Arc::new(index));
    }

    pub fn remove_query(&mut self, fingerprint: &QueryFingerprint) -> Option<Arc<QueryIndex>> {
        self.queries.remove(fingerprint)
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.queries.values().map(|q| q.len()).sum()
    }

    /// Coarsest step of any chunk intersecting `[from, to]`, else the project default
    pub fn coarsest_step(&self, from: Timestamp, to: Timestamp) -> Interval {
        self.queries
            .values()
            .filter_map(|q| q.coarsest_step(from, to))
            .max()
            .unwrap_or(self.step)
    }
}
