//! # Resident-Set Snapshot
//!
//! `resident.cache` captures the chunks that were resident when it was
//! written, so a reopened grid can warm its directory in one sequential read
//! instead of loading chunk files one miss at a time.
//!
//! ## File Layout
//!
//! ```text
//! +------------------------------------------+
//! | SnapshotHeader (32 bytes)                |
//! |   generation, record count, CRC-64       |
//! +------------------------------------------+
//! | i32 chunk_row | i32 chunk_col | u32 len  |  record 0
//! | chunk file image (header + payload)      |
//! +------------------------------------------+
//! | ...                                      |
//! +------------------------------------------+
//! ```
//!
//! The header checksum covers every record byte.
//!
//! ## Validity
//!
//! A snapshot is optional and never trusted blindly:
//!
//! - A missing, unreadable or checksum-failing file is ignored.
//! - A snapshot whose generation differs from grid.meta is stale and ignored.
//! - A record whose payload checksum differs from the chunk file's is
//!   skipped, since the chunk was rewritten after the snapshot.
//!
//! Only clean, non-mapped chunks are captured. Writing and preloading both
//! stop quietly at the first budget refusal.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use eyre::Result;
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use super::swap::{decode_image, encode_image, stored_checksum};
use super::{ChunkFileHeader, GridFiles, SnapshotHeader, StorageError, CRC64};
use crate::chunk::{Chunk, ChunkEncoding};
use crate::config::SNAPSHOT_HEADER_SIZE;
use crate::grid::{CellValue, ChunkId, GridId, GridShape};
use crate::memory::{is_allocation_pressure, IoBuffer, MemoryBudget};

const RECORD_PREFIX_SIZE: usize = 12;

fn record_prefix(id: ChunkId, image_len: usize) -> [u8; RECORD_PREFIX_SIZE] {
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    prefix[0..4].copy_from_slice(&id.row.to_le_bytes());
    prefix[4..8].copy_from_slice(&id.col.to_le_bytes());
    prefix[8..12].copy_from_slice(&(image_len as u32).to_le_bytes());
    prefix
}

fn parse_prefix(prefix: &[u8; RECORD_PREFIX_SIZE]) -> (ChunkId, usize) {
    let row = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let col = i32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    let len = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]);
    (ChunkId::new(row, col), len as usize)
}

/// Writes the snapshot of `chunks` for metadata generation `generation`.
/// Returns the number of records written.
pub fn write<'a, V, I>(
    files: &GridFiles,
    generation: u64,
    chunks: I,
    budget: &Arc<MemoryBudget>,
) -> Result<u32>
where
    V: CellValue,
    I: IntoIterator<Item = &'a Chunk<V>>,
{
    let dest = files.snapshot_path();
    let tmp = dest.with_extension("tmp");
    let io_err = |e: std::io::Error| StorageError::from_io(&dest, &e);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io_err)?;
    let mut out = BufWriter::new(file);
    out.write_all(&[0u8; SNAPSHOT_HEADER_SIZE]).map_err(io_err)?;

    let mut digest = CRC64.digest();
    let mut count = 0u32;
    for chunk in chunks {
        if chunk.is_dirty() || chunk.encoding() == ChunkEncoding::Mapped {
            continue;
        }
        let image = match encode_image(chunk, budget) {
            Ok(image) => image,
            Err(e) if is_allocation_pressure(&e) => {
                debug!("snapshot stops at chunk {}: {}", chunk.id(), e);
                break;
            }
            Err(e) => return Err(e),
        };
        let prefix = record_prefix(chunk.id(), image.len());
        digest.update(&prefix);
        digest.update(&image);
        out.write_all(&prefix).map_err(io_err)?;
        out.write_all(&image).map_err(io_err)?;
        count += 1;
    }

    let mut header = SnapshotHeader::new(generation);
    header.set_record_count(count);
    header.set_checksum(digest.finalize());

    let mut file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;
    file.write_all(header.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    std::fs::rename(&tmp, &dest).map_err(io_err)?;

    info!(
        "wrote snapshot of {} chunks at generation {} to '{}'",
        count,
        generation,
        dest.display()
    );
    Ok(count)
}

/// Reads and validates the snapshot header. Returns `None` when the snapshot
/// should be ignored.
fn open_valid(files: &GridFiles, generation: u64) -> Option<(BufReader<File>, u32)> {
    let path = files.snapshot_path();
    let file = File::open(&path).ok()?;
    let mut reader = BufReader::new(file);

    let mut head = [0u8; SNAPSHOT_HEADER_SIZE];
    if reader.read_exact(&mut head).is_err() {
        warn!("ignoring truncated snapshot '{}'", path.display());
        return None;
    }
    let header = match SnapshotHeader::from_bytes(&head) {
        Ok(header) => *header,
        Err(e) => {
            warn!("ignoring unreadable snapshot '{}': {:#}", path.display(), e);
            return None;
        }
    };

    if header.generation() != generation {
        warn!(
            "ignoring stale snapshot '{}': generation {} but grid is at {}",
            path.display(),
            header.generation(),
            generation
        );
        return None;
    }

    let mut digest = CRC64.digest();
    let mut block = [0u8; 8192];
    loop {
        match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => digest.update(&block[..n]),
            Err(e) => {
                warn!("ignoring unreadable snapshot '{}': {}", path.display(), e);
                return None;
            }
        }
    }
    if digest.finalize() != header.checksum() {
        warn!("ignoring snapshot '{}': checksum mismatch", path.display());
        return None;
    }

    if reader.seek(SeekFrom::Start(SNAPSHOT_HEADER_SIZE as u64)).is_err() {
        return None;
    }
    Some((reader, header.record_count()))
}

/// Loads snapshot records into `insert` until the snapshot is exhausted or
/// the budget refuses. Returns the number of chunks preloaded.
pub fn preload<V: CellValue>(
    files: &GridFiles,
    generation: u64,
    grid: GridId,
    shape: &GridShape,
    nodata: V,
    budget: &Arc<MemoryBudget>,
    mut insert: impl FnMut(Chunk<V>),
) -> Result<usize> {
    let Some((mut reader, records)) = open_valid(files, generation) else {
        return Ok(0);
    };
    let path = files.snapshot_path();

    let mut loaded = 0;
    for _ in 0..records {
        let mut prefix = [0u8; RECORD_PREFIX_SIZE];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| StorageError::from_io(&path, &e))?;
        let (id, len) = parse_prefix(&prefix);

        let mut image = match IoBuffer::zeroed(budget, len) {
            Ok(image) => image,
            Err(e) if is_allocation_pressure(&e) => break,
            Err(e) => return Err(e),
        };
        reader
            .read_exact(&mut image)
            .map_err(|e| StorageError::from_io(&path, &e))?;

        if !shape.is_valid_chunk(id) {
            warn!("skipping snapshot record for out-of-grid chunk {}", id);
            continue;
        }
        let current = stored_checksum(files, id);
        let captured = ChunkFileHeader::from_bytes(&image)
            .ok()
            .map(|header| header.checksum());
        if current.is_none() || current != captured {
            debug!("skipping snapshot record for rewritten chunk {}", id);
            continue;
        }

        match decode_image(&path, &image, grid, id, shape.chunk_dims(id), nodata, budget) {
            Ok(chunk) => {
                insert(chunk);
                loaded += 1;
            }
            Err(e) if is_allocation_pressure(&e) => break,
            Err(e) => {
                warn!("skipping damaged snapshot record for chunk {}: {:#}", id, e);
            }
        }
    }

    debug!("preloaded {} of {} snapshot chunks for {}", loaded, records, grid);
    Ok(loaded)
}
