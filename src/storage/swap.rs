//! # Persistence Bridge
//!
//! Saves chunks to and loads chunks from their per-chunk files.
//!
//! ## Chunk File Format
//!
//! ```text
//! +----------------------------------+
//! | ChunkFileHeader (64 bytes)       |
//! |   magic "GRIDCHNK", version      |
//! |   value type tag, encoding tag   |
//! |   nrows, ncols, entry count      |
//! |   payload length, CRC-64         |
//! +----------------------------------+
//! | payload                          |
//! |   Array/Mapped: n values         |
//! |   Sparse: (u32 offset, value)*   |
//! |   BitPacked: value + n/8 mask    |
//! +----------------------------------+
//! ```
//!
//! The same header-plus-payload image is embedded in snapshot records.
//!
//! ## Failure Handling
//!
//! Saving never returns an error. A chunk that cannot be written, whether
//! the write fails or the `Io` pool refuses the encode buffer, is logged and
//! reported as [`SaveOutcome::Failed`] with its dirty flag still set. Callers
//! that evict must keep such a chunk resident.
//!
//! Loading fails loudly: a missing, corrupt or unrecognised file surfaces as
//! a [`StorageError`]. Budget refusals while loading surface unchanged as
//! allocation pressure so the retry protocol can handle them.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use super::{atomic_write, ChunkFileHeader, GridFiles, StorageError, StorageErrorKind, CRC64};
use crate::chunk::{
    ArrayStore, BitPackedStore, CellStore, Chunk, ChunkEncoding, ChunkStore, MappedStore,
    SparseStore,
};
use crate::config::{CHUNK_HEADER_SIZE, CHUNK_OVERHEAD_BYTES, SPARSE_ENTRY_BYTES};
use crate::grid::{CellValue, ChunkId, GridId};
use crate::memory::{BudgetLease, IoBuffer, MemoryBudget, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing to write: the file already matches the chunk.
    Clean,
    Written,
    /// The write failed and was logged. The chunk is still dirty.
    Failed,
}

impl SaveOutcome {
    pub fn is_persisted(&self) -> bool {
        !matches!(self, SaveOutcome::Failed)
    }
}

fn corrupt(path: &Path, err: eyre::Report) -> eyre::Report {
    StorageError::report(path, StorageErrorKind::Corrupt, format!("{:#}", err))
}

fn chunk_header<V: CellValue>(chunk: &Chunk<V>, payload: &[u8]) -> ChunkFileHeader {
    let mut header = ChunkFileHeader::new(
        V::TYPE_TAG,
        chunk.encoding().tag(),
        chunk.nrows(),
        chunk.ncols(),
    );
    header.set_entry_count(chunk.store().entry_count());
    header.set_payload_len(payload.len() as u64);
    header.set_checksum(CRC64.checksum(payload));
    header
}

/// Encodes header and payload into one buffer charged to the `Io` pool.
pub fn encode_image<V: CellValue>(chunk: &Chunk<V>, budget: &Arc<MemoryBudget>) -> Result<IoBuffer> {
    let payload_len = chunk.store().payload_len();
    let mut image = IoBuffer::with_capacity(budget, CHUNK_HEADER_SIZE + payload_len)?;
    image.resize(CHUNK_HEADER_SIZE, 0);
    chunk.store().encode_payload(&mut image);

    let header = chunk_header(chunk, &image[CHUNK_HEADER_SIZE..]);
    image[..CHUNK_HEADER_SIZE].copy_from_slice(header.as_bytes());
    Ok(image)
}

fn write_chunk<V: CellValue>(
    files: &GridFiles,
    chunk: &mut Chunk<V>,
    budget: &Arc<MemoryBudget>,
) -> Result<usize> {
    let path = files.chunk_path(chunk.id());

    let mapped_header = chunk
        .store()
        .mapped()
        .map(|mapped| chunk_header(chunk, mapped.payload()));
    if let Some(header) = mapped_header {
        if let Some(mapped) = chunk.store_mut().mapped_mut() {
            mapped
                .flush_with_header(header.as_bytes())
                .map_err(|e| StorageError::report(&path, StorageErrorKind::Io, format!("{:#}", e)))?;
        }
        return Ok(CHUNK_HEADER_SIZE + header.payload_len() as usize);
    }

    let image = encode_image(chunk, budget)?;
    atomic_write(&path, &[image.as_slice()]).map_err(|e| StorageError::from_io(&path, &e))?;
    Ok(image.len())
}

/// Persists a dirty chunk. Clean chunks are skipped.
pub fn save<V: CellValue>(
    files: &GridFiles,
    chunk: &mut Chunk<V>,
    budget: &Arc<MemoryBudget>,
) -> SaveOutcome {
    if !chunk.is_dirty() {
        return SaveOutcome::Clean;
    }

    match write_chunk(files, chunk, budget) {
        Ok(bytes) => {
            chunk.clear_dirty();
            debug!(
                "saved chunk {} of {} ({} bytes, {})",
                chunk.id(),
                chunk.grid(),
                bytes,
                chunk.encoding().name()
            );
            SaveOutcome::Written
        }
        Err(e) => {
            warn!(
                "failed to persist chunk {} of {}, keeping it dirty: {:#}",
                chunk.id(),
                chunk.grid(),
                e
            );
            SaveOutcome::Failed
        }
    }
}

pub fn exists(files: &GridFiles, id: ChunkId) -> bool {
    files.chunk_path(id).is_file()
}

fn check_header<V: CellValue>(
    path: &Path,
    header: &ChunkFileHeader,
    dims: (u32, u32),
) -> Result<ChunkEncoding> {
    if header.value_type() != V::TYPE_TAG {
        return Err(StorageError::report(
            path,
            StorageErrorKind::Corrupt,
            format!(
                "value type tag {} does not match {} (tag {})",
                header.value_type(),
                V::NAME,
                V::TYPE_TAG
            ),
        ));
    }

    let encoding = ChunkEncoding::from_tag(header.encoding()).ok_or_else(|| {
        StorageError::report(
            path,
            StorageErrorKind::UnknownEncoding,
            format!("encoding tag {}", header.encoding()),
        )
    })?;

    if (header.nrows(), header.ncols()) != dims {
        return Err(StorageError::report(
            path,
            StorageErrorKind::Corrupt,
            format!(
                "shape {}x{} does not match expected {}x{}",
                header.nrows(),
                header.ncols(),
                dims.0,
                dims.1
            ),
        ));
    }
    Ok(encoding)
}

fn check_payload(path: &Path, header: &ChunkFileHeader, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 != header.payload_len() {
        return Err(StorageError::report(
            path,
            StorageErrorKind::Corrupt,
            format!(
                "payload is {} bytes, header records {}",
                payload.len(),
                header.payload_len()
            ),
        ));
    }

    let actual = CRC64.checksum(payload);
    if actual != header.checksum() {
        return Err(StorageError::report(
            path,
            StorageErrorKind::Corrupt,
            format!(
                "checksum mismatch: stored {:#018x}, computed {:#018x}",
                header.checksum(),
                actual
            ),
        ));
    }
    Ok(())
}

/// Decodes a header-plus-payload image into a resident chunk. `path` only
/// labels errors.
pub(crate) fn decode_image<V: CellValue>(
    path: &Path,
    image: &[u8],
    grid: GridId,
    id: ChunkId,
    dims: (u32, u32),
    nodata: V,
    budget: &Arc<MemoryBudget>,
) -> Result<Chunk<V>> {
    let header = ChunkFileHeader::from_bytes(image).map_err(|e| corrupt(path, e))?;
    let encoding = check_header::<V>(path, header, dims)?;
    let payload = &image[CHUNK_HEADER_SIZE..];
    check_payload(path, header, payload)?;

    let len = dims.0 * dims.1;
    let heap = match encoding {
        ChunkEncoding::Array => ArrayStore::<V>::bytes_for(len),
        ChunkEncoding::Sparse => payload.len() / (4 + V::WIDTH) * SPARSE_ENTRY_BYTES,
        ChunkEncoding::BitPacked => BitPackedStore::<V>::bytes_for(len),
        ChunkEncoding::Mapped => 0,
    };
    let lease = BudgetLease::acquire(budget, Pool::Chunks, heap + CHUNK_OVERHEAD_BYTES)?;

    let store = match encoding {
        ChunkEncoding::Array => ArrayStore::decode(payload, len, nodata).map(ChunkStore::Array),
        ChunkEncoding::Sparse => SparseStore::decode(payload, len, header.entry_count(), nodata)
            .map(ChunkStore::Sparse),
        ChunkEncoding::BitPacked => {
            BitPackedStore::decode(payload, len, nodata).map(ChunkStore::BitPacked)
        }
        ChunkEncoding::Mapped => Err(eyre::eyre!("mapped chunk stored as an inline image")),
    }
    .map_err(|e| corrupt(path, e))?;

    Ok(Chunk::with_lease(grid, id, dims.0, dims.1, store, lease))
}

fn load_mapped<V: CellValue>(
    path: &Path,
    header: &ChunkFileHeader,
    grid: GridId,
    id: ChunkId,
    dims: (u32, u32),
    nodata: V,
    budget: &Arc<MemoryBudget>,
) -> Result<Chunk<V>> {
    let lease = BudgetLease::acquire(budget, Pool::Chunks, CHUNK_OVERHEAD_BYTES)?;
    let store = MappedStore::open(path, CHUNK_HEADER_SIZE, dims.0 * dims.1, nodata)
        .map_err(|e| corrupt(path, e))?;
    check_payload(path, header, store.payload())?;
    Ok(Chunk::with_lease(
        grid,
        id,
        dims.0,
        dims.1,
        ChunkStore::Mapped(store),
        lease,
    ))
}

/// Loads a persisted chunk and re-attaches it to `grid` and `id`. The loaded
/// chunk is clean.
pub fn load<V: CellValue>(
    files: &GridFiles,
    grid: GridId,
    id: ChunkId,
    dims: (u32, u32),
    nodata: V,
    budget: &Arc<MemoryBudget>,
) -> Result<Chunk<V>> {
    let path = files.chunk_path(id);
    let mut file = File::open(&path).map_err(|e| StorageError::from_io(&path, &e))?;
    let file_len = file
        .metadata()
        .map_err(|e| StorageError::from_io(&path, &e))?
        .len();

    let mut head = [0u8; CHUNK_HEADER_SIZE];
    file.read_exact(&mut head).map_err(|e| {
        StorageError::report(&path, StorageErrorKind::Corrupt, format!("truncated header: {}", e))
    })?;
    let header = *ChunkFileHeader::from_bytes(&head).map_err(|e| corrupt(&path, e))?;
    let encoding = check_header::<V>(&path, &header, dims)?;

    if file_len != CHUNK_HEADER_SIZE as u64 + header.payload_len() {
        return Err(StorageError::report(
            &path,
            StorageErrorKind::Corrupt,
            format!(
                "file is {} bytes, header records a {} byte payload",
                file_len,
                header.payload_len()
            ),
        ));
    }

    let chunk = if encoding == ChunkEncoding::Mapped {
        drop(file);
        load_mapped(&path, &header, grid, id, dims, nodata, budget)?
    } else {
        let mut image = IoBuffer::zeroed(budget, file_len as usize)?;
        image[..CHUNK_HEADER_SIZE].copy_from_slice(&head);
        file.read_exact(&mut image[CHUNK_HEADER_SIZE..])
            .map_err(|e| StorageError::from_io(&path, &e))
            .wrap_err("failed to read chunk payload")?;
        decode_image(&path, &image, grid, id, dims, nodata, budget)?
    };

    debug!(
        "loaded chunk {} of {} ({})",
        id,
        grid,
        chunk.encoding().name()
    );
    Ok(chunk)
}

/// Payload checksum recorded in a chunk file's header, or `None` when the
/// file is missing or its header unreadable.
pub(crate) fn stored_checksum(files: &GridFiles, id: ChunkId) -> Option<u64> {
    let mut file = File::open(files.chunk_path(id)).ok()?;
    let mut head = [0u8; CHUNK_HEADER_SIZE];
    file.read_exact(&mut head).ok()?;
    ChunkFileHeader::from_bytes(&head)
        .ok()
        .map(|header| header.checksum())
}

/// Creates the backing file of a fresh mapped chunk, filled with no-data.
pub fn create_mapped<V: CellValue>(
    files: &GridFiles,
    grid: GridId,
    id: ChunkId,
    dims: (u32, u32),
    nodata: V,
    budget: &Arc<MemoryBudget>,
) -> Result<Chunk<V>> {
    let path = files.chunk_path(id);
    let lease = BudgetLease::acquire(budget, Pool::Chunks, CHUNK_OVERHEAD_BYTES)?;

    let mut header = ChunkFileHeader::new(V::TYPE_TAG, ChunkEncoding::Mapped.tag(), dims.0, dims.1);
    let mut store = MappedStore::create(&path, header.as_bytes(), dims.0 * dims.1, nodata)
        .map_err(|e| StorageError::report(&path, StorageErrorKind::Io, format!("{:#}", e)))?;

    header.set_entry_count(store.len() as u64);
    header.set_payload_len(store.payload().len() as u64);
    header.set_checksum(CRC64.checksum(store.payload()));
    store
        .flush_with_header(header.as_bytes())
        .map_err(|e| StorageError::report(&path, StorageErrorKind::Io, format!("{:#}", e)))?;

    let mut chunk = Chunk::with_lease(grid, id, dims.0, dims.1, ChunkStore::Mapped(store), lease);
    chunk.mark_dirty();
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::is_allocation_pressure;
    use crate::storage::storage_error;
    use tempfile::tempdir;

    const GRID: GridId = GridId(7);

    fn setup() -> (tempfile::TempDir, GridFiles, Arc<MemoryBudget>) {
        let dir = tempdir().unwrap();
        let files = GridFiles::new(dir.path());
        files.create_dirs().unwrap();
        (dir, files, Arc::new(MemoryBudget::with_limit(1 << 20)))
    }

    fn populated(encoding: ChunkEncoding, budget: &Arc<MemoryBudget>) -> Chunk<i32> {
        let mut chunk =
            Chunk::empty(GRID, ChunkId::new(1, 2), 3, 5, encoding, i32::MIN, budget).unwrap();
        chunk.set_cell(0, 4).unwrap();
        chunk.set_cell(7, 4).unwrap();
        chunk.set_cell(14, 4).unwrap();
        chunk
    }

    fn kind(err: &eyre::Report) -> StorageErrorKind {
        storage_error(err).expect("storage error").kind
    }

    #[test]
    fn save_then_load_preserves_values_and_encoding() {
        let (_dir, files, budget) = setup();
        for encoding in [ChunkEncoding::Array, ChunkEncoding::Sparse, ChunkEncoding::BitPacked] {
            let mut chunk = populated(encoding, &budget);
            let expected: Vec<_> = chunk.values().collect();

            assert_eq!(save(&files, &mut chunk, &budget), SaveOutcome::Written);
            assert!(!chunk.is_dirty());
            drop(chunk);

            let loaded = load::<i32>(&files, GRID, ChunkId::new(1, 2), (3, 5), i32::MIN, &budget)
                .unwrap();
            assert_eq!(loaded.encoding(), encoding);
            assert!(!loaded.is_dirty());
            assert_eq!(loaded.grid(), GRID);
            assert_eq!(loaded.id(), ChunkId::new(1, 2));
            assert_eq!(loaded.values().collect::<Vec<_>>(), expected);
        }
        assert_eq!(budget.pool_used(Pool::Io), 0);
    }

    #[test]
    fn clean_chunk_is_not_rewritten() {
        let (_dir, files, budget) = setup();
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        chunk.clear_dirty();

        assert_eq!(save(&files, &mut chunk, &budget), SaveOutcome::Clean);
        assert!(!exists(&files, chunk.id()));
    }

    #[test]
    fn mapped_chunk_round_trip() {
        let (_dir, files, budget) = setup();
        let id = ChunkId::new(0, 0);
        {
            let mut chunk =
                create_mapped::<f64>(&files, GRID, id, (2, 2), -1.0, &budget).unwrap();
            chunk.set_cell(3, 6.5).unwrap();
            assert_eq!(save(&files, &mut chunk, &budget), SaveOutcome::Written);
        }

        let loaded = load::<f64>(&files, GRID, id, (2, 2), -1.0, &budget).unwrap();
        assert_eq!(loaded.encoding(), ChunkEncoding::Mapped);
        assert_eq!(loaded.get_cell(3), 6.5);
        assert_eq!(loaded.get_cell(0), -1.0);
    }

    #[test]
    fn flipped_payload_byte_is_corrupt() {
        let (_dir, files, budget) = setup();
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        save(&files, &mut chunk, &budget);

        let path = files.chunk_path(chunk.id());
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[CHUNK_HEADER_SIZE + 2] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = load::<i32>(&files, GRID, chunk.id(), (3, 5), i32::MIN, &budget).unwrap_err();
        assert_eq!(kind(&err), StorageErrorKind::Corrupt);
    }

    #[test]
    fn missing_file_is_reported() {
        let (_dir, files, budget) = setup();
        let err = load::<i32>(&files, GRID, ChunkId::new(0, 0), (3, 5), i32::MIN, &budget)
            .unwrap_err();
        assert_eq!(kind(&err), StorageErrorKind::Missing);
    }

    #[test]
    fn unknown_encoding_tag_is_reported() {
        let (_dir, files, budget) = setup();
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        save(&files, &mut chunk, &budget);

        let path = files.chunk_path(chunk.id());
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[13] = 99;
        std::fs::write(&path, bytes).unwrap();

        let err = load::<i32>(&files, GRID, chunk.id(), (3, 5), i32::MIN, &budget).unwrap_err();
        assert_eq!(kind(&err), StorageErrorKind::UnknownEncoding);
    }

    #[test]
    fn wrong_value_type_is_corrupt() {
        let (_dir, files, budget) = setup();
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        save(&files, &mut chunk, &budget);

        let err = load::<f64>(&files, GRID, chunk.id(), (3, 5), -1.0, &budget).unwrap_err();
        assert_eq!(kind(&err), StorageErrorKind::Corrupt);
    }

    #[test]
    fn unwritable_directory_fails_and_keeps_dirty() {
        let dir = tempdir().unwrap();
        let files = GridFiles::new(dir.path().join("never-created"));
        let budget = Arc::new(MemoryBudget::with_limit(1 << 20));
        let mut chunk = populated(ChunkEncoding::Array, &budget);

        assert_eq!(save(&files, &mut chunk, &budget), SaveOutcome::Failed);
        assert!(chunk.is_dirty());
    }

    #[test]
    fn refused_io_buffer_fails_save() {
        let (_dir, files, _) = setup();
        let budget = Arc::new(MemoryBudget::with_limit(1 << 20));
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        budget.set_limit(budget.total_used());

        assert_eq!(save(&files, &mut chunk, &budget), SaveOutcome::Failed);
        assert!(chunk.is_dirty());
    }

    #[test]
    fn load_under_pressure_is_allocation_pressure() {
        let (_dir, files, budget) = setup();
        let mut chunk = populated(ChunkEncoding::Array, &budget);
        save(&files, &mut chunk, &budget);
        let id = chunk.id();
        drop(chunk);

        budget.set_limit(0);
        let err = load::<i32>(&files, GRID, id, (3, 5), i32::MIN, &budget).unwrap_err();
        assert!(is_allocation_pressure(&err));
        assert!(storage_error(&err).is_none());
    }
}
