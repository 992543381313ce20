//! Query Client
//!
//! Read-side handle of one project. Holds nothing but a reference to the
//! registry and the project id, so it is cheap to create per request.
//!
//! # Query Pipeline
//!
//! ```text
//! query_range:
//!   align [from, to] to step
//!     → registry read lock: project → fingerprint → overlapping chunks
//!     → release lock
//!     → read chunks oldest-first into one merge sink
//!     → sorted series
//! ```
//!
//! Chunks are read one at a time in ascending creation order, so a newer
//! chunk overwrites an older one wherever they overlap.

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::freshness::Status;
use crate::cache::registry::Cache;
use crate::cache::ProjectId;
use crate::index::QueryFingerprint;
use crate::storage::{points_between, FillFn, Interval, MetricValues, Timestamp};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline of one query
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(tokio::time::Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast if the query should not start more work
    pub fn check(&self) -> CacheResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the token fires or the deadline passes
    ///
    /// An abandoned future is dropped mid-flight.
    pub async fn run<F, T>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CacheError::Cancelled),
            _ = deadline => Err(CacheError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

/// Per-(cache, project) read handle
#[derive(Clone)]
pub struct QueryClient<'a> {
    cache: &'a Cache,
    project: ProjectId,
}

impl<'a> QueryClient<'a> {
    pub(crate) fn new(cache: &'a Cache, project: ProjectId) -> Self {
        Self { cache, project }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Merge every cached chunk of `query` intersecting `[from, to]`.
    ///
    /// Returns one series per identity with `(to - from) / step + 1` points on
    /// the step-aligned grid. A query with no index is a cache miss and yields
    /// an empty result. The first chunk read failure aborts the whole merge.
    pub async fn query_range(
        &self,
        query: &str,
        from: Timestamp,
        to: Timestamp,
        step: Interval,
        fill: &FillFn,
    ) -> CacheResult<Vec<MetricValues>> {
        self.query_range_with(&QueryContext::default(), query, from, to, step, fill)
            .await
    }

    /// [`query_range`](Self::query_range) honouring cancellation and a deadline
    pub async fn query_range_with(
        &self,
        ctx: &QueryContext,
        query: &str,
        from: Timestamp,
        to: Timestamp,
        step: Interval,
        fill: &FillFn,
    ) -> CacheResult<Vec<MetricValues>> {
        if step.0 <= 0 {
            return Err(CacheError::InvalidRange(format!("step must be positive, got {}", step)));
        }
        if from > to {
            return Err(CacheError::InvalidRange(format!("from {} is after to {}", from, to)));
        }

        let (Some(from), Some(to)) = (from.truncate(step), to.truncate(step)) else {
            return Err(CacheError::InvalidRange(format!("from {} is out of range", from)));
        };
        let points = points_between(from, to, step).ok_or_else(|| {
            CacheError::InvalidRange(format!("[{}, {}] at {} has too many points", from, to, step))
        })?;
        let fingerprint = QueryFingerprint::of(query);

        // Only the index lookup runs under the registry lock
        let chunks = self
            .cache
            .with_project(&self.project, |store| {
                store
                    .query(&fingerprint)
                    .map(|index| index.overlapping(from, to))
            })
            .await?;

        let Some(chunks) = chunks else {
            tracing::debug!(project = %self.project, query = %fingerprint, "Query not cached");
            return Ok(Vec::new());
        };

        let sink = self.cache.new_sink();
        let reader = self.cache.reader();
        let started = Instant::now();

        for chunk in &chunks {
            ctx.run(async {
                reader
                    .read(&chunk.path, from, points, step, &sink, fill)
                    .await
                    .map_err(CacheError::from)
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    project = %self.project,
                    query = %fingerprint,
                    path = %chunk.path.display(),
                    error = %e,
                    "Query range aborted"
                );
                e
            })?;
        }

        let mut values = sink.into_values();
        values.sort_by_key(|mv| mv.key);

        tracing::info!(
            project = %self.project,
            query = %fingerprint,
            chunks = chunks.len(),
            series = values.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query range merged"
        );
        Ok(values)
    }

    /// Coarsest step among all chunks of the project intersecting `[from, to]`
    ///
    /// Falls back to the project's default step when nothing intersects.
    pub async fn get_step(&self, from: Timestamp, to: Timestamp) -> CacheResult<Interval> {
        self.cache
            .with_project(&self.project, |store| store.coarsest_step(from, to))
            .await
    }

    /// Upper bound of fully ingested time: min source update minus one step
    ///
    /// Returns `Timestamp::ZERO` while no source has reported data.
    pub async fn get_to(&self) -> CacheResult<Timestamp> {
        let step = self
            .cache
            .with_project(&self.project, |store| store.step())
            .await?;

        let min_update = self.cache.freshness().min_update_time(&self.project).await?;
        if min_update.is_zero() {
            return Ok(Timestamp::ZERO);
        }
        Ok(min_update - step)
    }

    /// Ingestion status of the project, forwarded from the status source
    pub async fn get_status(&self) -> CacheResult<Status> {
        self.cache.status_source().status(&self.project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::freshness::{FreshnessSource, StatusSource, UpdateTracker};
    use crate::cache::registry::CacheOptions;
    use crate::storage::{
        fill, merge_series, ChunkDescriptor, ChunkError, ChunkFile, ChunkFileReader, ChunkReader,
        ChunkResult, ChunkSeries, Labels, MergeSink, StoredSeries,
    };
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn labels(job: &str) -> Labels {
        let mut l = Labels::new();
        l.insert("job".to_string(), job.to_string());
        l
    }

    fn constant(job: &str, value: f64, points: usize) -> StoredSeries {
        StoredSeries::new(labels(job), vec![value; points])
    }

    struct Fixture {
        cache: Cache,
        tracker: Arc<UpdateTracker>,
        dir: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_reader(Arc::new(ChunkFileReader::new())).await
        }

        async fn with_reader(reader: Arc<dyn ChunkReader>) -> Self {
            let tracker = Arc::new(UpdateTracker::new());
            let cache = Cache::new(reader, tracker.clone(), tracker.clone());
            cache.register_project("p1", Interval(30)).await;
            Self {
                cache,
                tracker,
                dir: tempdir().unwrap(),
            }
        }

        /// Write a chunk file and publish it under `query`
        async fn chunk(
            &self,
            query: &str,
            name: &str,
            from: i64,
            step: i64,
            created: i64,
            series: &[StoredSeries],
        ) -> ChunkDescriptor {
            let desc = ChunkFile::write(
                self.dir.path().join(name),
                Timestamp(from),
                Interval(step),
                Timestamp(created),
                series,
            )
            .unwrap();
            self.cache
                .publish_chunks(&ProjectId::from("p1"), query, Interval(step), vec![desc.clone()])
                .await
                .unwrap();
            desc
        }
    }

    #[tokio::test]
    async fn test_grid_alignment() {
        let fx = Fixture::new().await;
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 100)]).await;

        let client = fx.cache.client("p1");
        let res = client
            .query_range("up", Timestamp(17), Timestamp(263), Interval(30), &*fill::nan())
            .await
            .unwrap();

        // truncate(17, 30) = 0, truncate(263, 30) = 240 → 9 points
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].values.len(), 9);
        assert!(res[0].values.iter().all(|v| *v == 1.0));
    }

    #[tokio::test]
    async fn test_overlap_newer_chunk_wins() {
        let fx = Fixture::new().await;
        // A covers [0, 100], B covers [50, 150]
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 11)]).await;
        fx.chunk("up", "b", 50, 10, 2, &[constant("api", 2.0, 11)]).await;

        let res = fx
            .cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(150), Interval(10), &*fill::nan())
            .await
            .unwrap();

        let values = &res[0].values;
        assert_eq!(values.len(), 16);
        assert!(values[..5].iter().all(|v| *v == 1.0));
        assert!(values[5..].iter().all(|v| *v == 2.0));
    }

    #[tokio::test]
    async fn test_overlap_follows_created_not_publish_order() {
        let fx = Fixture::new().await;
        // Newer chunk published first
        fx.chunk("up", "b", 50, 10, 2, &[constant("api", 2.0, 11)]).await;
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 11)]).await;

        let res = fx
            .cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(150), Interval(10), &*fill::nan())
            .await
            .unwrap();

        assert_eq!(res[0].values[7], 2.0);
        assert_eq!(res[0].values[2], 1.0);
    }

    #[tokio::test]
    async fn test_series_from_different_chunks_are_merged() {
        let fx = Fixture::new().await;
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 5), constant("db", 3.0, 5)]).await;
        fx.chunk("up", "b", 50, 10, 2, &[constant("api", 2.0, 5)]).await;

        let res = fx
            .cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(90), Interval(10), &*fill::nan())
            .await
            .unwrap();

        assert_eq!(res.len(), 2);
        let api = res.iter().find(|mv| mv.labels == labels("api")).unwrap();
        let db = res.iter().find(|mv| mv.labels == labels("db")).unwrap();
        assert_eq!(api.defined(), 10);
        assert_eq!(db.defined(), 5);
        assert!(db.values[5..].iter().all(|v| v.is_nan()));
    }

    #[tokio::test]
    async fn test_cache_miss_is_empty() {
        let fx = Fixture::new().await;
        let client = fx.cache.client("p1");

        for _ in 0..3 {
            let res = client
                .query_range(
                    "never-cached",
                    Timestamp(0),
                    Timestamp(100),
                    Interval(10),
                    &*fill::nan(),
                )
                .await
                .unwrap();
            assert!(res.is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_overlapping_chunks_is_empty() {
        let fx = Fixture::new().await;
        fx.chunk("up", "a", 10_000, 10, 1, &[constant("api", 1.0, 5)]).await;

        let res = fx
            .cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(100), Interval(10), &*fill::nan())
            .await
            .unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let fx = Fixture::new().await;
        let client = fx.cache.client("ghost");

        let err = client
            .query_range("up", Timestamp(0), Timestamp(100), Interval(10), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownProject(_)));

        let err = client.get_step(Timestamp(0), Timestamp(100)).await.unwrap_err();
        assert!(matches!(err, CacheError::UnknownProject(_)));

        let err = client.get_to().await.unwrap_err();
        assert!(matches!(err, CacheError::UnknownProject(_)));
    }

    #[tokio::test]
    async fn test_invalid_range() {
        let fx = Fixture::new().await;
        let client = fx.cache.client("p1");

        let err = client
            .query_range("up", Timestamp(100), Timestamp(0), Interval(10), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange(_)));

        let err = client
            .query_range("up", Timestamp(0), Timestamp(100), Interval(0), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_extreme_range_rejected() {
        let fx = Fixture::new().await;
        fx.chunk("up", "c1", 0, 10, 1, &[constant("api", 1.0, 11)]).await;
        let client = fx.cache.client("p1");

        // Aligning i64::MIN down leaves the i64 range
        let err = client
            .query_range("up", Timestamp(i64::MIN), Timestamp(0), Interval(30), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange(_)));

        // Point count overflows
        let err = client
            .query_range(
                "up",
                Timestamp(i64::MIN + 1),
                Timestamp(i64::MAX),
                Interval(7),
                &*fill::nan(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange(_)));

        let err = client
            .query_range("up", Timestamp(0), Timestamp(i64::MAX), Interval(1), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_get_step() {
        let fx = Fixture::new().await;
        let client = fx.cache.client("p1");

        // No chunks at all: project default
        assert_eq!(client.get_step(Timestamp(0), Timestamp(600)).await.unwrap(), Interval(30));

        fx.chunk("q1", "fine", 0, 10, 1, &[constant("api", 1.0, 60)]).await;
        fx.chunk("q2", "coarse", 0, 60, 1, &[constant("api", 1.0, 10)]).await;

        assert_eq!(client.get_step(Timestamp(0), Timestamp(600)).await.unwrap(), Interval(60));
        // Window beyond every chunk: project default
        assert_eq!(
            client.get_step(Timestamp(100_000), Timestamp(100_600)).await.unwrap(),
            Interval(30)
        );
    }

    #[tokio::test]
    async fn test_get_to() {
        let fx = Fixture::new().await;
        let client = fx.cache.client("p1");
        let p = ProjectId::from("p1");

        assert_eq!(client.get_to().await.unwrap(), Timestamp::ZERO);

        fx.tracker.record_update(&p, "prom", Timestamp(10_000));
        fx.tracker.record_update(&p, "otel", Timestamp(9_000));
        assert_eq!(client.get_to().await.unwrap(), Timestamp(9_000 - 30));
    }

    #[tokio::test]
    async fn test_get_status_forwards() {
        let fx = Fixture::new().await;
        let p = ProjectId::from("p1");
        fx.tracker.record_error(&p, "prom", "timeout");

        let status = fx.cache.client("p1").get_status().await.unwrap();
        assert_eq!(status.sources, 1);
        assert_eq!(status.error.as_deref(), Some("prom: timeout"));
    }

    /// Signal source whose backend is down
    struct UnreachableSignals;

    #[async_trait]
    impl FreshnessSource for UnreachableSignals {
        async fn min_update_time(&self, _project: &ProjectId) -> CacheResult<Timestamp> {
            Err(CacheError::Freshness("clickhouse unreachable".to_string()))
        }
    }

    #[async_trait]
    impl StatusSource for UnreachableSignals {
        async fn status(&self, _project: &ProjectId) -> CacheResult<Status> {
            Err(CacheError::Status("clickhouse unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_signal_errors_propagate() {
        let signals = Arc::new(UnreachableSignals);
        let cache = Cache::new(Arc::new(ChunkFileReader::new()), signals.clone(), signals);
        cache.register_project("p1", Interval(30)).await;
        let client = cache.client("p1");

        match client.get_to().await {
            Err(CacheError::Freshness(msg)) => assert_eq!(msg, "clickhouse unreachable"),
            other => panic!("expected freshness error, got {:?}", other),
        }
        match client.get_status().await {
            Err(CacheError::Status(msg)) => assert_eq!(msg, "clickhouse unreachable"),
            other => panic!("expected status error, got {:?}", other),
        }

        // Unknown projects fail before the signal is asked
        assert!(matches!(
            cache.client("nope").get_to().await,
            Err(CacheError::UnknownProject(_))
        ));
    }

    /// Reader that fails on one path and counts calls
    struct FailingReader {
        inner: ChunkFileReader,
        fail_on: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChunkReader for FailingReader {
        async fn read(
            &self,
            path: &Path,
            from: Timestamp,
            points: usize,
            step: Interval,
            sink: &MergeSink,
            fill: &FillFn,
        ) -> ChunkResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.ends_with(&self.fail_on) {
                return Err(ChunkError::corruption(path, "injected"));
            }
            self.inner.read(path, from, points, step, sink, fill).await
        }
    }

    #[tokio::test]
    async fn test_abort_on_read_error() {
        let reader = Arc::new(FailingReader {
            inner: ChunkFileReader::new(),
            fail_on: "b".to_string(),
            calls: AtomicUsize::new(0),
        });
        let fx = Fixture::with_reader(reader.clone()).await;
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 11)]).await;
        fx.chunk("up", "b", 50, 10, 2, &[constant("api", 2.0, 11)]).await;
        fx.chunk("up", "c", 100, 10, 3, &[constant("api", 3.0, 11)]).await;

        let err = fx
            .cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(200), Interval(10), &*fill::nan())
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::ChunkRead(ChunkError::Corruption { .. })));
        // The third chunk is never read
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    /// Reader that merges a fixed series without touching disk
    struct StaticReader;

    #[async_trait]
    impl ChunkReader for StaticReader {
        async fn read(
            &self,
            _path: &Path,
            from: Timestamp,
            points: usize,
            step: Interval,
            sink: &MergeSink,
            fill: &FillFn,
        ) -> ChunkResult<()> {
            let l = labels("api");
            let samples = vec![1.0; points];
            merge_series(
                sink,
                ChunkSeries {
                    labels: &l,
                    from,
                    step,
                    samples: &samples,
                },
                from,
                points,
                step,
                fill,
            );
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let fx = Fixture::with_reader(Arc::new(StaticReader)).await;
        let p = ProjectId::from("p1");
        fx.cache
            .publish_chunks(
                &p,
                "up",
                Interval(10),
                vec![ChunkDescriptor::new("x", Timestamp(0), Interval(10), 10, Timestamp(1))],
            )
            .await
            .unwrap();

        let ctx = QueryContext::new();
        ctx.cancel_token().cancel();

        let err = fx
            .cache
            .client("p1")
            .query_range_with(&ctx, "up", Timestamp(0), Timestamp(90), Interval(10), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
    }

    /// Reader that never finishes
    struct StuckReader;

    #[async_trait]
    impl ChunkReader for StuckReader {
        async fn read(
            &self,
            _path: &Path,
            _from: Timestamp,
            _points: usize,
            _step: Interval,
            _sink: &MergeSink,
            _fill: &FillFn,
        ) -> ChunkResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_in_flight_read() {
        let fx = Fixture::with_reader(Arc::new(StuckReader)).await;
        fx.cache
            .publish_chunks(
                &ProjectId::from("p1"),
                "up",
                Interval(10),
                vec![ChunkDescriptor::new("x", Timestamp(0), Interval(10), 10, Timestamp(1))],
            )
            .await
            .unwrap();

        let ctx = QueryContext::new().with_timeout(std::time::Duration::from_secs(5));
        let err = fx
            .cache
            .client("p1")
            .query_range_with(&ctx, "up", Timestamp(0), Timestamp(90), Interval(10), &*fill::nan())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_sharded_sink_gives_same_result() {
        let tracker = Arc::new(UpdateTracker::new());
        let cache = Cache::with_options(
            Arc::new(ChunkFileReader::new()),
            tracker.clone(),
            tracker,
            CacheOptions { merge_shards: 4 },
        );
        cache.register_project("p1", Interval(30)).await;
        let dir = tempdir().unwrap();

        let series: Vec<StoredSeries> = (0..20)
            .map(|i| constant(&format!("job{}", i), i as f64, 10))
            .collect();
        let desc = ChunkFile::write(
            dir.path().join("a"),
            Timestamp(0),
            Interval(10),
            Timestamp(1),
            &series,
        )
        .unwrap();
        cache
            .publish_chunks(&ProjectId::from("p1"), "up", Interval(10), vec![desc])
            .await
            .unwrap();

        let res = cache
            .client("p1")
            .query_range("up", Timestamp(0), Timestamp(90), Interval(10), &*fill::nan())
            .await
            .unwrap();

        assert_eq!(res.len(), 20);
        // Sorted by series key
        assert!(res.windows(2).all(|w| w[0].key < w[1].key));
    }

    #[tokio::test]
    async fn test_concurrent_queries_and_writes() {
        let fx = Arc::new(Fixture::new().await);
        fx.chunk("up", "a", 0, 10, 1, &[constant("api", 1.0, 11)]).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let fx = Arc::clone(&fx);
            handles.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    fx.cache.register_project(format!("extra{}", i), Interval(30)).await;
                }
                let res = fx
                    .cache
                    .client("p1")
                    .query_range("up", Timestamp(0), Timestamp(100), Interval(10), &*fill::nan())
                    .await
                    .unwrap();
                assert_eq!(res.len(), 1);
                assert_eq!(res[0].defined(), 11);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // p1 plus four extra projects
        assert_eq!(fx.cache.stats().await.projects, 5);
    }

    #[tokio::test]
    async fn test_signals_are_object_safe() {
        let tracker: Arc<UpdateTracker> = Arc::new(UpdateTracker::new());
        let freshness: Arc<dyn FreshnessSource> = tracker.clone();
        let status: Arc<dyn StatusSource> = tracker;
        let p = ProjectId::from("p1");
        assert_eq!(freshness.min_update_time(&p).await.unwrap(), Timestamp::ZERO);
        assert_eq!(status.status(&p).await.unwrap().sources, 0);
    }
}
