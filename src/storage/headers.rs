//! # File Header Definitions
//!
//! Zerocopy header structs for the three grid file types. Every header
//! starts with 8 magic bytes and the format version.
//!
//! ## File Types
//!
//! 1. **chunks/<row>_<col>.chunk** - one persisted chunk (ChunkFileHeader, 64 bytes)
//!    - Value type, encoding, effective shape, entry count
//!    - Payload length and CRC-64 of the payload
//!
//! 2. **grid.meta** - grid metadata (GridFileHeader, 128 bytes)
//!    - Shape, no-data bits, default encoding, statistics
//!    - Write generation, bumped on every flush
//!    - Followed by length-prefixed dimension strings
//!
//! 3. **resident.cache** - resident-set snapshot (SnapshotHeader, 32 bytes)
//!    - Generation of the grid.meta it was written with
//!    - Record count and CRC-64 over all records
//!
//! ## Zerocopy Safety
//!
//! All header structs use zerocopy traits for safe, zero-copy serialization:
//! - `FromBytes`: Safe to read from arbitrary bytes
//! - `IntoBytes`: Safe to write as bytes
//! - `Immutable`: No interior mutability
//! - `KnownLayout`: Compile-time size verification
//! - `Unaligned`: Works with unaligned memory (mmap)
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian via the zerocopy `little_endian`
//! wrapper types. Cell values and statistics are stored as raw bits
//! (`CellValue::to_bits`), so the header is independent of the value type.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{CHUNK_HEADER_SIZE, FORMAT_VERSION, GRID_HEADER_SIZE, SNAPSHOT_HEADER_SIZE};

pub const CHUNK_MAGIC: &[u8; 8] = b"GRIDCHNK";
pub const GRID_MAGIC: &[u8; 8] = b"GRIDMETA";
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"GRIDSNAP";

fn check_version(version: u32, file: &str) -> Result<()> {
    ensure!(
        version == FORMAT_VERSION,
        "unsupported {} version: {} (expected {})",
        file,
        version,
        FORMAT_VERSION
    );
    Ok(())
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ChunkFileHeader {
    magic: [u8; 8],
    version: U32,
    value_type: u8,
    encoding: u8,
    reserved0: [u8; 2],
    nrows: U32,
    ncols: U32,
    entry_count: U64,
    payload_len: U64,
    checksum: U64,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<ChunkFileHeader>() == CHUNK_HEADER_SIZE);

impl ChunkFileHeader {
    pub fn new(value_type: u8, encoding: u8, nrows: u32, ncols: u32) -> Self {
        Self {
            magic: *CHUNK_MAGIC,
            version: U32::new(FORMAT_VERSION),
            value_type,
            encoding,
            reserved0: [0; 2],
            nrows: U32::new(nrows),
            ncols: U32::new(ncols),
            entry_count: U64::new(0),
            payload_len: U64::new(0),
            checksum: U64::new(0),
            reserved: [0; 16],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= CHUNK_HEADER_SIZE,
            "buffer too small for ChunkFileHeader: {} < {}",
            bytes.len(),
            CHUNK_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..CHUNK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ChunkFileHeader: {:?}", e))?;

        ensure!(&header.magic == CHUNK_MAGIC, "invalid magic bytes in chunk file");
        check_version(header.version.get(), "chunk file")?;
        Ok(header)
    }

    pub fn value_type(&self) -> u8 {
        self.value_type
    }

    pub fn encoding(&self) -> u8 {
        self.encoding
    }

    zerocopy_accessors! {
        version: u32,
        nrows: u32,
        ncols: u32,
        entry_count: u64,
        payload_len: u64,
        checksum: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct GridFileHeader {
    magic: [u8; 8],
    version: U32,
    value_type: u8,
    encoding: u8,
    stats_mode: u8,
    reserved0: u8,
    nrows: I64,
    ncols: I64,
    chunk_nrows: I32,
    chunk_ncols: I32,
    nodata_bits: U64,
    generation: U64,
    stats_count: U64,
    stats_sum_bits: U64,
    stats_min_bits: U64,
    stats_max_bits: U64,
    stats_min_count: U64,
    stats_max_count: U64,
    stats_flags: U32,
    reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<GridFileHeader>() == GRID_HEADER_SIZE);

impl GridFileHeader {
    pub fn new(value_type: u8) -> Self {
        Self {
            magic: *GRID_MAGIC,
            version: U32::new(FORMAT_VERSION),
            value_type,
            encoding: 0,
            stats_mode: 0,
            reserved0: 0,
            nrows: I64::new(0),
            ncols: I64::new(0),
            chunk_nrows: I32::new(0),
            chunk_ncols: I32::new(0),
            nodata_bits: U64::new(0),
            generation: U64::new(0),
            stats_count: U64::new(0),
            stats_sum_bits: U64::new(0),
            stats_min_bits: U64::new(0),
            stats_max_bits: U64::new(0),
            stats_min_count: U64::new(0),
            stats_max_count: U64::new(0),
            stats_flags: U32::new(0),
            reserved: [0; 20],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= GRID_HEADER_SIZE,
            "buffer too small for GridFileHeader: {} < {}",
            bytes.len(),
            GRID_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..GRID_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse GridFileHeader: {:?}", e))?;

        ensure!(&header.magic == GRID_MAGIC, "invalid magic bytes in grid.meta");
        check_version(header.version.get(), "grid.meta")?;
        Ok(header)
    }

    pub fn value_type(&self) -> u8 {
        self.value_type
    }

    pub fn encoding(&self) -> u8 {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: u8) {
        self.encoding = encoding;
    }

    pub fn stats_mode(&self) -> u8 {
        self.stats_mode
    }

    pub fn set_stats_mode(&mut self, mode: u8) {
        self.stats_mode = mode;
    }

    zerocopy_accessors! {
        version: u32,
        nrows: i64,
        ncols: i64,
        chunk_nrows: i32,
        chunk_ncols: i32,
        nodata_bits: u64,
        generation: u64,
        stats_count: u64,
        stats_sum_bits: u64,
        stats_min_bits: u64,
        stats_max_bits: u64,
        stats_min_count: u64,
        stats_max_count: u64,
        stats_flags: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SnapshotHeader {
    magic: [u8; 8],
    version: U32,
    record_count: U32,
    generation: U64,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<SnapshotHeader>() == SNAPSHOT_HEADER_SIZE);

impl SnapshotHeader {
    pub fn new(generation: u64) -> Self {
        Self {
            magic: *SNAPSHOT_MAGIC,
            version: U32::new(FORMAT_VERSION),
            record_count: U32::new(0),
            generation: U64::new(generation),
            checksum: U64::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= SNAPSHOT_HEADER_SIZE,
            "buffer too small for SnapshotHeader: {} < {}",
            bytes.len(),
            SNAPSHOT_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..SNAPSHOT_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse SnapshotHeader: {:?}", e))?;

        ensure!(
            &header.magic == SNAPSHOT_MAGIC,
            "invalid magic bytes in resident.cache"
        );
        check_version(header.version.get(), "resident.cache")?;
        Ok(header)
    }

    zerocopy_accessors! {
        version: u32,
        record_count: u32,
        generation: u64,
        checksum: u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_round_trip() {
        let mut header = ChunkFileHeader::new(2, 1, 4, 3);
        header.set_entry_count(12);
        header.set_payload_len(96);
        header.set_checksum(0xDEAD_BEEF);

        let parsed = ChunkFileHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.value_type(), 2);
        assert_eq!(parsed.encoding(), 1);
        assert_eq!((parsed.nrows(), parsed.ncols()), (4, 3));
        assert_eq!(parsed.entry_count(), 12);
        assert_eq!(parsed.payload_len(), 96);
        assert_eq!(parsed.checksum(), 0xDEAD_BEEF);
    }

    #[test]
    fn chunk_header_rejects_bad_magic() {
        let header = ChunkFileHeader::new(1, 1, 1, 1);
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] = b'X';
        let err = ChunkFileHeader::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn grid_header_stores_signed_shape() {
        let mut header = GridFileHeader::new(1);
        header.set_nrows(1_000_000_000_000);
        header.set_chunk_ncols(-1);
        let parsed = GridFileHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.nrows(), 1_000_000_000_000);
        assert_eq!(parsed.chunk_ncols(), -1);
    }

    #[test]
    fn snapshot_header_rejects_future_version() {
        let mut header = SnapshotHeader::new(3);
        header.set_version(FORMAT_VERSION + 1);
        assert!(SnapshotHeader::from_bytes(header.as_bytes()).is_err());
    }
}
