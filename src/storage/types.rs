//! Core data types for the rangecache read path
//!
//! This module defines the fundamental types shared by the chunk reader,
//! the index and the query client:
//! - `Timestamp` / `Interval`: second-resolution time arithmetic on a step grid
//! - `ChunkDescriptor`: an immutable on-disk chunk as the index knows it
//! - `MetricValues`: one merged series in a query result
//! - `SeriesKey` / `Labels`: stable series identity across chunks

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::path::{Path, PathBuf};

/// Unix timestamp in seconds. Zero means "unset".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

/// A span of time in seconds (step widths, lags)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Round down to a multiple of `step`.
    ///
    /// Uses Euclidean division so pre-epoch timestamps land on the grid
    /// point at or before them, not after. `None` when that grid point is
    /// below `i64::MIN`.
    pub fn truncate(self, step: Interval) -> Option<Self> {
        if step.0 <= 0 {
            return Some(self);
        }
        self.0.checked_sub(self.0.rem_euclid(step.0)).map(Timestamp)
    }
}

impl Add<Interval> for Timestamp {
    type Output = Timestamp;

    fn add(self, d: Interval) -> Timestamp {
        Timestamp(self.0 + d.0)
    }
}

impl Sub<Interval> for Timestamp {
    type Output = Timestamp;

    fn sub(self, d: Interval) -> Timestamp {
        Timestamp(self.0 - d.0)
    }
}

impl Sub for Timestamp {
    type Output = Interval;

    fn sub(self, other: Timestamp) -> Interval {
        Interval(self.0 - other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Interval {
    pub const fn seconds(secs: i64) -> Self {
        Interval(secs)
    }

    pub const fn minutes(mins: i64) -> Self {
        Interval(mins * 60)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Number of grid points in the inclusive range `[from, to]` at `step`.
///
/// Both bounds must already be aligned to `step`; returns 0 for an empty or
/// inverted range, `None` when the count does not fit in `usize`.
pub fn points_between(from: Timestamp, to: Timestamp, step: Interval) -> Option<usize> {
    if step.0 <= 0 || to < from {
        return Some(0);
    }
    let span = to.0.checked_sub(from.0)?;
    let points = (span / step.0).checked_add(1)?;
    usize::try_from(points).ok()
}

/// Label set identifying a series. Sorted so the identity hash is stable.
pub type Labels = BTreeMap<String, String>;

/// Stable identity of a series, derived from its labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesKey(pub u64);

impl SeriesKey {
    /// Hash a label set into a series key.
    ///
    /// SHA-256 over `name=value` pairs in label order, truncated to 64 bits.
    /// Never uses a per-process seeded hasher: the same labels must map to
    /// the same key in every chunk and across restarts.
    pub fn from_labels(labels: &Labels) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in labels {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0xff]);
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        SeriesKey(u64::from_be_bytes(head))
    }
}

/// An immutable on-disk chunk as known to the index
///
/// Once published, the file at `path` is never mutated. Two descriptors of the
/// same query may overlap in time; the one with the larger `created` wins for
/// the overlapping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// First sample timestamp
    pub from: Timestamp,
    /// Sampling step of the chunk
    pub step: Interval,
    /// Number of samples per series
    pub points: usize,
    /// Location of the chunk file
    pub path: PathBuf,
    /// Creation time, orders overlapping chunks
    pub created: Timestamp,
}

impl ChunkDescriptor {
    pub fn new(
        path: impl Into<PathBuf>,
        from: Timestamp,
        step: Interval,
        points: usize,
        created: Timestamp,
    ) -> Self {
        Self {
            from,
            step,
            points,
            path: path.into(),
            created,
        }
    }

    /// Timestamp of the last sample: `from + step * (points - 1)`
    pub fn to(&self) -> Timestamp {
        let n = self.points.saturating_sub(1) as i64;
        self.from + Interval(self.step.0 * n)
    }

    /// Whether `[from, to]` of the chunk intersects the given inclusive window
    pub fn intersects(&self, from: Timestamp, to: Timestamp) -> bool {
        !(self.from > to || self.to() < from)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One merged series of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub key: SeriesKey,
    pub labels: Labels,
    /// One value per grid point, NaN where no chunk had data
    pub values: Vec<f64>,
}

impl MetricValues {
    /// Create a series with every grid point unset
    pub fn empty(labels: Labels, points: usize) -> Self {
        Self {
            key: SeriesKey::from_labels(&labels),
            labels,
            values: vec![f64::NAN; points],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of grid points holding a value
    pub fn defined(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}
