//! Chunk read contract and the merge step shared by all readers
//!
//! A [`ChunkReader`] turns one chunk into rows of the caller's output grid
//! and writes them into a [`MergeSink`]. Readers only touch grid points that
//! fall inside the chunk's own `[from, to]`, so reading chunks in ascending
//! creation order lets a newer chunk overwrite an older one exactly where
//! they overlap.

use crate::collections::ShardedMap;
use crate::storage::error::ChunkResult;
use crate::storage::types::{Interval, Labels, MetricValues, SeriesKey, Timestamp};
use async_trait::async_trait;
use std::path::Path;

/// Resolves a value for a grid timestamp with no stored sample.
///
/// Receives the timestamp and the last known value of the series before it.
pub type FillFn = dyn Fn(Timestamp, Option<f64>) -> f64 + Send + Sync;

/// Per-query aggregation structure: series identity → merged values
pub type MergeSink = ShardedMap<SeriesKey, MetricValues>;

/// Reads one immutable chunk into a merge sink
#[async_trait]
pub trait ChunkReader: Send + Sync {
    /// Write `points` samples per stored series, aligned to `from + i * step`.
    ///
    /// Must be safe to call repeatedly for overlapping windows: each call
    /// overwrites the sink only for the timestamps the chunk covers.
    async fn read(
        &self,
        path: &Path,
        from: Timestamp,
        points: usize,
        step: Interval,
        sink: &MergeSink,
        fill: &FillFn,
    ) -> ChunkResult<()>;
}

/// Stored samples of one series within a chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkSeries<'a> {
    pub labels: &'a Labels,
    /// First sample timestamp of the chunk
    pub from: Timestamp,
    /// Sampling step of the chunk
    pub step: Interval,
    /// Stored samples, NaN marks a missing sample
    pub samples: &'a [f64],
}

impl ChunkSeries<'_> {
    fn to(&self) -> Timestamp {
        let n = self.samples.len().saturating_sub(1) as i64;
        self.from + Interval(self.step.0 * n)
    }

    /// Stored sample at `ts`, if `ts` is on the chunk grid and not a gap
    fn sample_at(&self, ts: Timestamp) -> Option<f64> {
        let offset = (ts - self.from).0;
        if self.step.0 <= 0 || offset < 0 || offset % self.step.0 != 0 {
            return None;
        }
        self.samples
            .get((offset / self.step.0) as usize)
            .copied()
            .filter(|v| !v.is_nan())
    }
}

/// Merge one series of a chunk into the sink on the `[from, step, points]` grid.
///
/// Grid points outside the chunk's coverage are left untouched. Inside it,
/// stored samples win; gaps go through `fill` with the last known value.
pub fn merge_series(
    sink: &MergeSink,
    series: ChunkSeries<'_>,
    from: Timestamp,
    points: usize,
    step: Interval,
    fill: &FillFn,
) {
    if points == 0 || series.samples.is_empty() || step.0 <= 0 {
        return;
    }
    let last = from + Interval(step.0 * (points as i64 - 1));
    let chunk_to = series.to();
    if series.from > last || chunk_to < from {
        return;
    }

    // First and last grid indices inside [series.from, chunk_to]
    let start_offset = if series.from <= from {
        0
    } else {
        ((series.from - from).0 + step.0 - 1) / step.0
    };
    let start = start_offset as usize;
    let end = ((chunk_to.min(last) - from).0 / step.0) as usize;
    if start > end {
        return;
    }

    let key = SeriesKey::from_labels(series.labels);
    sink.upsert_with(
        key,
        || MetricValues::empty(series.labels.clone(), points),
        |row| {
            let mut prior = row.values[..start]
                .iter()
                .rev()
                .copied()
                .find(|v| !v.is_nan());

            for i in start..=end {
                let ts = from + Interval(step.0 * i as i64);
                let value = match series.sample_at(ts) {
                    Some(v) => v,
                    None => fill(ts, prior),
                };
                row.values[i] = value;
                if !value.is_nan() {
                    prior = Some(value);
                }
            }
        },
    );
}

/// Built-in fill policies
pub mod fill {
    use super::FillFn;
    use crate::storage::types::Timestamp;
    use std::sync::Arc;

    /// Leave gaps unset
    pub fn nan() -> Arc<FillFn> {
        Arc::new(|_: Timestamp, _: Option<f64>| f64::NAN)
    }

    /// Treat missing samples as zero
    pub fn zero() -> Arc<FillFn> {
        Arc::new(|_: Timestamp, _: Option<f64>| 0.0)
    }

    /// Carry the last known value forward
    pub fn previous() -> Arc<FillFn> {
        Arc::new(|_: Timestamp, prior: Option<f64>| prior.unwrap_or(f64::NAN))
    }

    /// Look up a built-in policy by name: `nan`, `zero` or `previous`
    pub fn by_name(name: &str) -> Option<Arc<FillFn>> {
        match name {
            "nan" | "none" => Some(nan()),
            "zero" => Some(zero()),
            "previous" | "prev" => Some(previous()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(job: &str) -> Labels {
        let mut l = Labels::new();
        l.insert("job".to_string(), job.to_string());
        l
    }

    fn row(sink: &MergeSink, job: &str) -> Vec<f64> {
        sink.load(&SeriesKey::from_labels(&labels(job)))
            .map(|mv| mv.values)
            .unwrap_or_default()
    }

    fn same(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn test_merge_within_window() {
        let sink = MergeSink::single();
        let l = labels("api");
        let samples = [1.0, 2.0, 3.0];
        let series = ChunkSeries {
            labels: &l,
            from: Timestamp(20),
            step: Interval(10),
            samples: &samples,
        };

        // Grid 0..=60 step 10, chunk covers 20..=40
        merge_series(&sink, series, Timestamp(0), 7, Interval(10), &*fill::nan());

        let nan = f64::NAN;
        assert!(same(&row(&sink, "api"), &[nan, nan, 1.0, 2.0, 3.0, nan, nan]));
    }

    #[test]
    fn test_merge_overwrites_only_covered_points() {
        let sink = MergeSink::single();
        let l = labels("api");
        let old = [1.0; 6];
        let new = [9.0; 3];

        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(0),
                step: Interval(10),
                samples: &old,
            },
            Timestamp(0),
            6,
            Interval(10),
            &*fill::nan(),
        );
        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(20),
                step: Interval(10),
                samples: &new,
            },
            Timestamp(0),
            6,
            Interval(10),
            &*fill::nan(),
        );

        assert!(same(&row(&sink, "api"), &[1.0, 1.0, 9.0, 9.0, 9.0, 1.0]));
    }

    #[test]
    fn test_fill_previous_uses_prior_value() {
        let sink = MergeSink::single();
        let l = labels("api");
        let samples = [5.0, f64::NAN, f64::NAN, 7.0];

        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(0),
                step: Interval(10),
                samples: &samples,
            },
            Timestamp(0),
            4,
            Interval(10),
            &*fill::previous(),
        );

        assert!(same(&row(&sink, "api"), &[5.0, 5.0, 5.0, 7.0]));
    }

    #[test]
    fn test_coarser_grid_samples_chunk() {
        let sink = MergeSink::single();
        let l = labels("api");
        let samples: Vec<f64> = (0..7).map(|i| i as f64).collect();

        // Chunk at 10s, grid at 30s: only timestamps 0, 30, 60 are read
        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(0),
                step: Interval(10),
                samples: &samples,
            },
            Timestamp(0),
            3,
            Interval(30),
            &*fill::zero(),
        );

        assert!(same(&row(&sink, "api"), &[0.0, 3.0, 6.0]));
    }

    #[test]
    fn test_off_grid_points_are_filled() {
        let sink = MergeSink::single();
        let l = labels("api");
        let samples = [1.0, 2.0];

        // Chunk at 60s starting at 0; grid at 20s sees 0, 20, 40, 60
        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(0),
                step: Interval(60),
                samples: &samples,
            },
            Timestamp(0),
            4,
            Interval(20),
            &*fill::zero(),
        );

        assert!(same(&row(&sink, "api"), &[1.0, 0.0, 0.0, 2.0]));
    }

    #[test]
    fn test_chunk_outside_window_creates_nothing() {
        let sink = MergeSink::single();
        let l = labels("api");
        let samples = [1.0, 2.0];

        merge_series(
            &sink,
            ChunkSeries {
                labels: &l,
                from: Timestamp(1000),
                step: Interval(10),
                samples: &samples,
            },
            Timestamp(0),
            10,
            Interval(10),
            &*fill::zero(),
        );

        assert!(sink.is_empty());
    }

    #[test]
    fn test_fill_by_name() {
        assert!(fill::by_name("previous").is_some());
        assert!(fill::by_name("zero").is_some());
        assert!(fill::by_name("nan").is_some());
        assert!(fill::by_name("linear").is_none());

        let f = fill::by_name("previous").unwrap();
        assert_eq!(f(Timestamp(0), Some(4.0)), 4.0);
        assert!(f(Timestamp(0), None).is_nan());
    }
}
