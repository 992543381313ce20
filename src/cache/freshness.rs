//! Freshness and status signals
//!
//! Both signals are owned by the ingestion side. The query client only reads
//! them: `min_update_time` bounds the queryable range, `status` is forwarded
//! to callers as-is.
//!
//! [`UpdateTracker`] is an in-process implementation of both signals, fed by
//! whoever ingests the project's upstream sources.

use crate::cache::error::CacheResult;
use crate::cache::ProjectId;
use crate::collections::LockedMap;
use crate::storage::{Interval, Timestamp};
use async_trait::async_trait;
use serde::Serialize;

/// Minimum "last successfully ingested" time across a project's sources
#[async_trait]
pub trait FreshnessSource: Send + Sync {
    /// `Timestamp::ZERO` means no data has been ingested yet
    async fn min_update_time(&self, project: &ProjectId) -> CacheResult<Timestamp>;
}

/// Per-project ingestion health
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, project: &ProjectId) -> CacheResult<Status>;
}

/// Ingestion health of one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Errors reported by sources, `source: message` joined with "; "
    pub error: Option<String>,
    /// Largest lag of any source that has data
    pub lag_max: Interval,
    /// Mean lag over sources that have data
    pub lag_avg: Interval,
    /// Number of known sources
    pub sources: usize,
}

#[derive(Debug, Clone, Default)]
struct SourceState {
    last_update: Timestamp,
    error: Option<String>,
}

/// In-process freshness and status tracker
#[derive(Debug, Default)]
pub struct UpdateTracker {
    /// (project, source) → state
    sources: LockedMap<(ProjectId, String), SourceState>,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a source that has not delivered data yet
    pub fn register_source(&self, project: &ProjectId, source: &str) {
        self.sources
            .load_or_store((project.clone(), source.to_string()), SourceState::default());
    }

    /// Record a successful ingestion up to `ts` and clear the source's error
    pub fn record_update(&self, project: &ProjectId, source: &str, ts: Timestamp) {
        self.sources.upsert_with(
            (project.clone(), source.to_string()),
            SourceState::default,
            |state| {
                state.last_update = ts;
                state.error = None;
            },
        );
    }

    /// Record a failed ingestion; the last successful time is kept
    pub fn record_error(&self, project: &ProjectId, source: &str, error: impl Into<String>) {
        let error = error.into();
        self.sources.upsert_with(
            (project.clone(), source.to_string()),
            SourceState::default,
            |state| state.error = Some(error),
        );
    }

    /// Forget every source of a project
    pub fn forget_project(&self, project: &ProjectId) {
        let keys: Vec<_> = self
            .sources
            .snapshot()
            .into_keys()
            .filter(|(p, _)| p == project)
            .collect();
        for key in keys {
            self.sources.delete(&key);
        }
    }

    fn project_sources(&self, project: &ProjectId) -> Vec<(String, SourceState)> {
        let mut out = Vec::new();
        self.sources.for_each(|(p, source), state| {
            if p == project {
                out.push((source.clone(), state.clone()));
            }
            true
        });
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Minimum last update across the project's sources, ZERO if any has none
    pub fn min_update(&self, project: &ProjectId) -> Timestamp {
        self.project_sources(project)
            .iter()
            .map(|(_, s)| s.last_update)
            .min()
            .unwrap_or(Timestamp::ZERO)
    }

    /// Status of the project as seen at `now`
    pub fn status_at(&self, project: &ProjectId, now: Timestamp) -> Status {
        let sources = self.project_sources(project);

        let errors: Vec<String> = sources
            .iter()
            .filter_map(|(name, s)| s.error.as_ref().map(|e| format!("{}: {}", name, e)))
            .collect();

        let lags: Vec<i64> = sources
            .iter()
            .filter(|(_, s)| !s.last_update.is_zero())
            .map(|(_, s)| (now - s.last_update).0.max(0))
            .collect();

        let lag_max = lags.iter().copied().max().unwrap_or(0);
        let lag_avg = if lags.is_empty() {
            0
        } else {
            lags.iter().sum::<i64>() / lags.len() as i64
        };

        Status {
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            lag_max: Interval(lag_max),
            lag_avg: Interval(lag_avg),
            sources: sources.len(),
        }
    }
}

#[async_trait]
impl FreshnessSource for UpdateTracker {
    async fn min_update_time(&self, project: &ProjectId) -> CacheResult<Timestamp> {
        Ok(self.min_update(project))
    }
}

#[async_trait]
impl StatusSource for UpdateTracker {
    async fn status(&self, project: &ProjectId) -> CacheResult<Status> {
        Ok(self.status_at(project, Timestamp::now()))
    }
}
