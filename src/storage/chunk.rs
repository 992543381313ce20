//! Chunk file format and the file-backed chunk reader
//!
//! A chunk holds every series of one query for a fixed time range at a fixed
//! step. Files are written once and never modified afterwards.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (48 bytes)                       │
//! │   magic: [u8; 4] = "RCHK"               │
//! │   version: u16                          │
//! │   reserved: u16                         │
//! │   from: i64                             │
//! │   step: i64                             │
//! │   points: u32                           │
//! │   series_count: u32                     │
//! │   created: i64                          │
//! │   reserved: [u8; 4]                     │
//! │   checksum: u32 (CRC32 of bytes 0..44)  │
//! ├─────────────────────────────────────────┤
//! │ BODY                                    │
//! │   LZ4(bincode(Vec<StoredSeries>))       │
//! ├─────────────────────────────────────────┤
//! │ body_checksum: u32                      │
//! └─────────────────────────────────────────┘
//! ```

use crate::storage::error::{ChunkError, ChunkResult};
use crate::storage::reader::{merge_series, ChunkReader, ChunkSeries, FillFn, MergeSink};
use crate::storage::types::{ChunkDescriptor, Interval, Labels, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for chunk file identification
const CHUNK_MAGIC: [u8; 4] = *b"RCHK";

/// Current chunk format version
const CHUNK_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 48;

/// One series as stored in a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSeries {
    pub labels: Labels,
    /// Exactly `points` samples, NaN for missing
    pub values: Vec<f64>,
}

impl StoredSeries {
    pub fn new(labels: Labels, values: Vec<f64>) -> Self {
        Self { labels, values }
    }
}

/// Chunk file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub from: Timestamp,
    pub step: Interval,
    pub points: u32,
    pub series_count: u32,
    pub created: Timestamp,
}

impl ChunkHeader {
    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&CHUNK_MAGIC);
        buf[4..6].copy_from_slice(&CHUNK_VERSION.to_le_bytes());
        // bytes 6-7 reserved
        buf[8..16].copy_from_slice(&self.from.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.step.0.to_le_bytes());
        buf[24..28].copy_from_slice(&self.points.to_le_bytes());
        buf[28..32].copy_from_slice(&self.series_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.created.0.to_le_bytes());
        // bytes 40-43 reserved

        let checksum = crc32fast::hash(&buf[0..44]);
        buf[44..48].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(path: &Path, buf: &[u8; HEADER_SIZE]) -> ChunkResult<Self> {
        if buf[0..4] != CHUNK_MAGIC {
            return Err(ChunkError::InvalidFormat(format!(
                "{:?}: bad magic {:?}",
                path,
                &buf[0..4]
            )));
        }

        let stored_checksum = u32::from_le_bytes(le_array(&buf[44..48]));
        let computed_checksum = crc32fast::hash(&buf[0..44]);
        if stored_checksum != computed_checksum {
            return Err(ChunkError::corruption(
                path,
                format!(
                    "header checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            ));
        }

        let version = u16::from_le_bytes(le_array(&buf[4..6]));
        if version != CHUNK_VERSION {
            return Err(ChunkError::InvalidFormat(format!(
                "{:?}: unsupported version {}",
                path, version
            )));
        }

        let header = Self {
            from: Timestamp(i64::from_le_bytes(le_array(&buf[8..16]))),
            step: Interval(i64::from_le_bytes(le_array(&buf[16..24]))),
            points: u32::from_le_bytes(le_array(&buf[24..28])),
            series_count: u32::from_le_bytes(le_array(&buf[28..32])),
            created: Timestamp(i64::from_le_bytes(le_array(&buf[32..40]))),
        };
        if header.step.0 <= 0 {
            return Err(ChunkError::corruption(path, "non-positive step"));
        }
        Ok(header)
    }

    /// Index descriptor for the chunk stored at `path`
    pub fn descriptor(&self, path: impl Into<PathBuf>) -> ChunkDescriptor {
        ChunkDescriptor::new(path, self.from, self.step, self.points as usize, self.created)
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Encoder/decoder for whole chunk files
pub struct ChunkFile;

impl ChunkFile {
    /// Encode a chunk into its on-disk byte form
    pub fn encode(
        from: Timestamp,
        step: Interval,
        created: Timestamp,
        series: &[StoredSeries],
    ) -> ChunkResult<Vec<u8>> {
        if step.0 <= 0 {
            return Err(ChunkError::InvalidFormat(format!("invalid step {}", step)));
        }
        let points = series.first().map(|s| s.values.len()).unwrap_or(0);
        if let Some(bad) = series.iter().find(|s| s.values.len() != points) {
            return Err(ChunkError::InvalidFormat(format!(
                "series {:?} has {} points, expected {}",
                bad.labels,
                bad.values.len(),
                points
            )));
        }

        let header = ChunkHeader {
            from,
            step,
            points: points as u32,
            series_count: series.len() as u32,
            created,
        };

        let serialized = bincode::serialize(series)?;
        let body = lz4_flex::compress_prepend_size(&serialized);

        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(buf)
    }

    /// Decode a full chunk file
    pub fn decode(path: &Path, bytes: &[u8]) -> ChunkResult<(ChunkHeader, Vec<StoredSeries>)> {
        if bytes.len() < HEADER_SIZE + 4 {
            return Err(ChunkError::corruption(
                path,
                format!("truncated file: {} bytes", bytes.len()),
            ));
        }

        let header = ChunkHeader::from_bytes(path, &le_array(&bytes[..HEADER_SIZE]))?;

        let body = &bytes[HEADER_SIZE..bytes.len() - 4];
        let stored_checksum = u32::from_le_bytes(le_array(&bytes[bytes.len() - 4..]));
        let computed_checksum = crc32fast::hash(body);
        if stored_checksum != computed_checksum {
            return Err(ChunkError::corruption(
                path,
                format!(
                    "body checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            ));
        }

        let serialized = lz4_flex::decompress_size_prepended(body)
            .map_err(|e| ChunkError::Compression(e.to_string()))?;
        let series: Vec<StoredSeries> = bincode::deserialize(&serialized)?;

        if series.len() != header.series_count as usize {
            return Err(ChunkError::corruption(
                path,
                format!(
                    "series count mismatch: header={}, body={}",
                    header.series_count,
                    series.len()
                ),
            ));
        }

        Ok((header, series))
    }

    /// Write a chunk file and return its index descriptor
    ///
    /// Writes to a temporary sibling first and renames it into place, so a
    /// reader never observes a partially written chunk.
    pub fn write(
        path: impl AsRef<Path>,
        from: Timestamp,
        step: Interval,
        created: Timestamp,
        series: &[StoredSeries],
    ) -> ChunkResult<ChunkDescriptor> {
        let path = path.as_ref();
        let bytes = Self::encode(from, step, created, series)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ChunkError::io(parent, e))?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        {
            let mut file = File::create(&tmp).map_err(|e| ChunkError::io(&tmp, e))?;
            file.write_all(&bytes).map_err(|e| ChunkError::io(&tmp, e))?;
            file.sync_all().map_err(|e| ChunkError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, path).map_err(|e| ChunkError::io(path, e))?;

        let points = series.first().map(|s| s.values.len()).unwrap_or(0);
        Ok(ChunkDescriptor::new(path, from, step, points, created))
    }

    /// Read only the header of a chunk file
    pub fn read_header(path: impl AsRef<Path>) -> ChunkResult<ChunkHeader> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| ChunkError::io(path, e))?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf).map_err(|e| ChunkError::io(path, e))?;
        ChunkHeader::from_bytes(path, &buf)
    }
}

impl ChunkDescriptor {
    /// Build a descriptor from the header of an existing chunk file
    pub fn from_file(path: impl AsRef<Path>) -> ChunkResult<Self> {
        let path = path.as_ref();
        Ok(ChunkFile::read_header(path)?.descriptor(path))
    }
}

/// Reads chunk files from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkFileReader;

impl ChunkFileReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChunkReader for ChunkFileReader {
    async fn read(
        &self,
        path: &Path,
        from: Timestamp,
        points: usize,
        step: Interval,
        sink: &MergeSink,
        fill: &FillFn,
    ) -> ChunkResult<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ChunkError::io(path, e))?;
        let (header, series) = ChunkFile::decode(path, &bytes)?;

        for s in &series {
            merge_series(
                sink,
                ChunkSeries {
                    labels: &s.labels,
                    from: header.from,
                    step: header.step,
                    samples: &s.values,
                },
                from,
                points,
                step,
                fill,
            );
        }

        tracing::debug!(
            path = %path.display(),
            series = series.len(),
            chunk_from = header.from.0,
            chunk_step = header.step.0,
            "Chunk merged"
        );
        Ok(())
    }
}
