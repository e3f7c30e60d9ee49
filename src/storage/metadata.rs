//! # Grid Metadata
//!
//! `grid.meta` holds everything needed to reconstruct a grid without touching
//! its chunks:
//!
//! ```text
//! +--------------------------------+
//! | GridFileHeader (128 bytes)     |  shape, no-data, encoding, stats,
//! |                                |  stats mode, write generation
//! +--------------------------------+
//! | u32 len | cellsize (utf-8)     |
//! | u32 len | xmin                 |
//! | u32 len | ymin                 |
//! | u32 len | xmax                 |
//! | u32 len | ymax                 |
//! +--------------------------------+
//! ```
//!
//! The generation increases on every write. A snapshot records the
//! generation it was taken at and is ignored when the two disagree.

use eyre::Result;
use zerocopy::IntoBytes;

use super::{atomic_write, GridFileHeader, GridFiles, StorageError, StorageErrorKind};
use crate::chunk::ChunkEncoding;
use crate::config::GRID_HEADER_SIZE;
use crate::geometry::Dimensions;
use crate::grid::{GridShape, PersistedStats, StatsMode};

const STATS_VALID: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct GridMetadata {
    pub value_type: u8,
    pub shape: GridShape,
    pub dimensions: Dimensions,
    pub nodata_bits: u64,
    pub encoding: ChunkEncoding,
    pub stats_mode: StatsMode,
    pub stats: PersistedStats,
    pub generation: u64,
}

impl GridMetadata {
    pub fn write(&self, files: &GridFiles) -> Result<()> {
        let mut header = GridFileHeader::new(self.value_type);
        header.set_encoding(self.encoding.tag());
        header.set_stats_mode(self.stats_mode.tag());
        header.set_nrows(self.shape.nrows());
        header.set_ncols(self.shape.ncols());
        header.set_chunk_nrows(self.shape.chunk_nrows());
        header.set_chunk_ncols(self.shape.chunk_ncols());
        header.set_nodata_bits(self.nodata_bits);
        header.set_generation(self.generation);
        header.set_stats_count(self.stats.count);
        header.set_stats_sum_bits(self.stats.sum_bits);
        header.set_stats_min_bits(self.stats.min_bits);
        header.set_stats_max_bits(self.stats.max_bits);
        header.set_stats_min_count(self.stats.min_count);
        header.set_stats_max_count(self.stats.max_count);
        header.set_stats_flags(if self.stats.valid { STATS_VALID } else { 0 });

        let mut body = Vec::new();
        for part in self.dimensions.to_strings() {
            body.extend_from_slice(&(part.len() as u32).to_le_bytes());
            body.extend_from_slice(part.as_bytes());
        }

        let path = files.meta_path();
        atomic_write(&path, &[header.as_bytes(), body.as_slice()])
            .map_err(|e| StorageError::from_io(&path, &e))
    }

    pub fn read(files: &GridFiles) -> Result<Self> {
        let path = files.meta_path();
        let bytes = std::fs::read(&path).map_err(|e| StorageError::from_io(&path, &e))?;
        let corrupt =
            |detail: String| StorageError::report(&path, StorageErrorKind::Corrupt, detail);

        let header =
            GridFileHeader::from_bytes(&bytes).map_err(|e| corrupt(format!("{:#}", e)))?;

        let mut strings = Vec::with_capacity(5);
        let mut rest = &bytes[GRID_HEADER_SIZE..];
        for _ in 0..5 {
            if rest.len() < 4 {
                return Err(corrupt("truncated dimension block".to_string()));
            }
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return Err(corrupt("truncated dimension block".to_string()));
            }
            let text = std::str::from_utf8(&rest[..len])
                .map_err(|e| corrupt(format!("dimension is not utf-8: {}", e)))?;
            strings.push(text);
            rest = &rest[len..];
        }
        let dimensions =
            Dimensions::parse(&[strings[0], strings[1], strings[2], strings[3], strings[4]])
                .map_err(|e| corrupt(format!("{:#}", e)))?;

        let shape = GridShape::new(
            header.nrows(),
            header.ncols(),
            header.chunk_nrows(),
            header.chunk_ncols(),
        )?;
        let encoding = ChunkEncoding::from_tag(header.encoding()).ok_or_else(|| {
            StorageError::report(
                &path,
                StorageErrorKind::UnknownEncoding,
                format!("default encoding tag {}", header.encoding()),
            )
        })?;
        let stats_mode = StatsMode::from_tag(header.stats_mode())
            .ok_or_else(|| corrupt(format!("stats mode tag {}", header.stats_mode())))?;

        Ok(Self {
            value_type: header.value_type(),
            shape,
            dimensions,
            nodata_bits: header.nodata_bits(),
            encoding,
            stats_mode,
            stats: PersistedStats {
                count: header.stats_count(),
                sum_bits: header.stats_sum_bits(),
                min_bits: header.stats_min_bits(),
                max_bits: header.stats_max_bits(),
                min_count: header.stats_min_count(),
                max_count: header.stats_max_count(),
                valid: header.stats_flags() & STATS_VALID != 0,
            },
            generation: header.generation(),
        })
    }
}
