//! # Chunks
//!
//! A [`Chunk`] is one rectangular block of a grid's cells and the unit of
//! residency: it is loaded, dirtied, persisted and evicted as a whole.
//!
//! ## Encodings
//!
//! The values of a chunk live in a [`ChunkStore`], a closed set of encodings
//! sharing the [`CellStore`] capability:
//!
//! | Encoding    | Layout                                  | Heap cost           |
//! |-------------|-----------------------------------------|---------------------|
//! | `Array`     | dense row-major `Vec<V>`                | `n * WIDTH`         |
//! | `Sparse`    | `offset -> value` map, no-data implicit | 16 bytes per entry  |
//! | `BitPacked` | one value + presence bitmask            | `n / 8`             |
//! | `Mapped`    | dense values in a memory-mapped file    | none                |
//!
//! A bit-packed chunk can only hold one distinct value. Writing a second
//! distinct value widens it to `Array` in place; the widening is charged to
//! the chunk's lease first, so it can fail with allocation pressure like any
//! other allocation.
//!
//! ## Back-References
//!
//! A chunk records the [`GridId`] and [`ChunkId`] it belongs to as plain
//! identifiers. They are never written to disk; the persistence layer
//! re-attaches them from the file location when the chunk is loaded.
//!
//! ## Memory Accounting
//!
//! Every chunk carries a [`BudgetLease`] covering its store's heap footprint
//! plus a fixed overhead. Growth is charged before it happens and the lease
//! is released when the chunk is dropped, so resident memory and the budget
//! always agree.

mod array;
mod bitpacked;
mod mapped;
mod sparse;

use std::sync::Arc;

use eyre::{bail, Result};

pub use array::ArrayStore;
pub use bitpacked::BitPackedStore;
pub use mapped::MappedStore;
pub use sparse::SparseStore;

use crate::config::CHUNK_OVERHEAD_BYTES;
use crate::grid::{CellValue, ChunkId, GridId};
use crate::memory::{BudgetLease, MemoryBudget, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkEncoding {
    Array = 1,
    Sparse = 2,
    BitPacked = 3,
    Mapped = 4,
}

impl ChunkEncoding {
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ChunkEncoding::Array),
            2 => Some(ChunkEncoding::Sparse),
            3 => Some(ChunkEncoding::BitPacked),
            4 => Some(ChunkEncoding::Mapped),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkEncoding::Array => "array",
            ChunkEncoding::Sparse => "sparse",
            ChunkEncoding::BitPacked => "bitpacked",
            ChunkEncoding::Mapped => "mapped",
        }
    }
}

/// Get/set/iterate capability shared by every chunk encoding.
pub trait CellStore<V: CellValue> {
    /// Number of cells the store covers.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `offset`; callers guarantee `offset < len()`.
    fn get(&self, offset: u32) -> V;

    /// Stores `value` and returns the previous value.
    fn set(&mut self, offset: u32, value: V) -> V;

    /// Heap bytes the store would occupy after `set(offset, value)`.
    fn heap_bytes_after(&self, offset: u32, value: V) -> usize;

    fn heap_bytes(&self) -> usize;

    fn nodata(&self) -> V;

    /// Calls `f` for every cell holding a value other than no-data.
    fn for_each_data(&self, f: &mut dyn FnMut(u32, V));

    fn encoding(&self) -> ChunkEncoding;

    /// Number of payload entries recorded in a chunk file header.
    fn entry_count(&self) -> u64;

    /// Appends the encoding's file payload.
    fn encode_payload(&self, out: &mut Vec<u8>);

    fn payload_len(&self) -> usize;
}

pub enum ChunkStore<V: CellValue> {
    Array(ArrayStore<V>),
    Sparse(SparseStore<V>),
    BitPacked(BitPackedStore<V>),
    Mapped(MappedStore<V>),
}

impl<V: CellValue> ChunkStore<V> {
    /// A store of `len` no-data cells in the given in-memory encoding.
    pub fn empty(encoding: ChunkEncoding, len: u32, nodata: V) -> Result<Self> {
        Ok(match encoding {
            ChunkEncoding::Array => ChunkStore::Array(ArrayStore::filled(len, nodata)),
            ChunkEncoding::Sparse => ChunkStore::Sparse(SparseStore::new(len, nodata)),
            ChunkEncoding::BitPacked => ChunkStore::BitPacked(BitPackedStore::new(len, nodata)),
            ChunkEncoding::Mapped => bail!("mapped stores are created by the persistence layer"),
        })
    }

    /// Heap bytes an empty store of this encoding needs, used to size the
    /// lease before the store is allocated.
    pub fn empty_heap_bytes(encoding: ChunkEncoding, len: u32) -> usize {
        match encoding {
            ChunkEncoding::Array => ArrayStore::<V>::bytes_for(len),
            ChunkEncoding::Sparse => 0,
            ChunkEncoding::BitPacked => BitPackedStore::<V>::bytes_for(len),
            ChunkEncoding::Mapped => 0,
        }
    }

    fn as_store(&self) -> &dyn CellStore<V> {
        match self {
            ChunkStore::Array(s) => s,
            ChunkStore::Sparse(s) => s,
            ChunkStore::BitPacked(s) => s,
            ChunkStore::Mapped(s) => s,
        }
    }

    fn as_store_mut(&mut self) -> &mut dyn CellStore<V> {
        match self {
            ChunkStore::Array(s) => s,
            ChunkStore::Sparse(s) => s,
            ChunkStore::BitPacked(s) => s,
            ChunkStore::Mapped(s) => s,
        }
    }

    pub fn mapped(&self) -> Option<&MappedStore<V>> {
        match self {
            ChunkStore::Mapped(s) => Some(s),
            _ => None,
        }
    }

    pub fn mapped_mut(&mut self) -> Option<&mut MappedStore<V>> {
        match self {
            ChunkStore::Mapped(s) => Some(s),
            _ => None,
        }
    }

    fn write(&mut self, offset: u32, value: V) -> V {
        if let ChunkStore::BitPacked(bits) = self {
            if bits.needs_widening(value) {
                *self = ChunkStore::Array(bits.to_array());
            }
        }
        self.as_store_mut().set(offset, value)
    }
}

impl<V: CellValue> CellStore<V> for ChunkStore<V> {
    fn len(&self) -> u32 {
        self.as_store().len()
    }

    fn get(&self, offset: u32) -> V {
        self.as_store().get(offset)
    }

    fn set(&mut self, offset: u32, value: V) -> V {
        self.write(offset, value)
    }

    fn heap_bytes_after(&self, offset: u32, value: V) -> usize {
        self.as_store().heap_bytes_after(offset, value)
    }

    fn heap_bytes(&self) -> usize {
        self.as_store().heap_bytes()
    }

    fn nodata(&self) -> V {
        self.as_store().nodata()
    }

    fn for_each_data(&self, f: &mut dyn FnMut(u32, V)) {
        self.as_store().for_each_data(f)
    }

    fn encoding(&self) -> ChunkEncoding {
        self.as_store().encoding()
    }

    fn entry_count(&self) -> u64 {
        self.as_store().entry_count()
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        self.as_store().encode_payload(out)
    }

    fn payload_len(&self) -> usize {
        self.as_store().payload_len()
    }
}

pub struct Chunk<V: CellValue> {
    grid: GridId,
    id: ChunkId,
    nrows: u32,
    ncols: u32,
    store: ChunkStore<V>,
    dirty: bool,
    lease: BudgetLease,
}

impl<V: CellValue> std::fmt::Debug for Chunk<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("grid", &self.grid)
            .field("id", &self.id)
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("encoding", &self.store.encoding())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl<V: CellValue> Chunk<V> {
    /// Wraps a store, leasing its footprint from the `Chunks` pool.
    pub fn new(
        grid: GridId,
        id: ChunkId,
        nrows: u32,
        ncols: u32,
        store: ChunkStore<V>,
        budget: &Arc<MemoryBudget>,
    ) -> Result<Self> {
        let lease = BudgetLease::acquire(
            budget,
            Pool::Chunks,
            store.heap_bytes() + CHUNK_OVERHEAD_BYTES,
        )?;
        Ok(Self::with_lease(grid, id, nrows, ncols, store, lease))
    }

    /// Wraps a store whose footprint the caller already leased. Used where the
    /// lease has to exist before the store is allocated.
    pub fn with_lease(
        grid: GridId,
        id: ChunkId,
        nrows: u32,
        ncols: u32,
        store: ChunkStore<V>,
        lease: BudgetLease,
    ) -> Self {
        debug_assert_eq!(store.len(), nrows * ncols);
        Self {
            grid,
            id,
            nrows,
            ncols,
            store,
            dirty: false,
            lease,
        }
    }

    /// A fresh chunk of no-data cells. Fresh chunks start dirty: nothing on
    /// disk describes them yet.
    pub fn empty(
        grid: GridId,
        id: ChunkId,
        nrows: u32,
        ncols: u32,
        encoding: ChunkEncoding,
        nodata: V,
        budget: &Arc<MemoryBudget>,
    ) -> Result<Self> {
        let len = nrows * ncols;
        let lease = BudgetLease::acquire(
            budget,
            Pool::Chunks,
            ChunkStore::<V>::empty_heap_bytes(encoding, len) + CHUNK_OVERHEAD_BYTES,
        )?;
        let store = ChunkStore::empty(encoding, len, nodata)?;
        let mut chunk = Self::with_lease(grid, id, nrows, ncols, store, lease);
        chunk.dirty = true;
        Ok(chunk)
    }

    pub fn grid(&self) -> GridId {
        self.grid
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Re-links the chunk to its owner after deserialization.
    pub fn attach(&mut self, grid: GridId, id: ChunkId) {
        self.grid = grid;
        self.id = id;
    }

    pub fn nrows(&self) -> u32 {
        self.nrows
    }

    pub fn ncols(&self) -> u32 {
        self.ncols
    }

    pub fn len(&self) -> u32 {
        self.nrows * self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodata(&self) -> V {
        self.store.nodata()
    }

    pub fn encoding(&self) -> ChunkEncoding {
        self.store.encoding()
    }

    pub fn store(&self) -> &ChunkStore<V> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ChunkStore<V> {
        &mut self.store
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn leased_bytes(&self) -> usize {
        self.lease.bytes()
    }

    /// Value at `offset`, or no-data when the offset lies outside the chunk.
    pub fn get_cell(&self, offset: u32) -> V {
        if offset >= self.len() {
            return self.store.nodata();
        }
        self.store.get(offset)
    }

    /// Stores `value` and returns the previous value. Out-of-range offsets are
    /// a no-op returning no-data. Any growth of the store is charged to the
    /// lease first, so an allocation failure leaves the chunk unchanged.
    pub fn set_cell(&mut self, offset: u32, value: V) -> Result<V> {
        if offset >= self.len() {
            return Ok(self.store.nodata());
        }

        let needed = self.store.heap_bytes_after(offset, value) + CHUNK_OVERHEAD_BYTES;
        if needed != self.lease.bytes() {
            self.lease.resize(needed)?;
        }

        let old = self.store.write(offset, value);
        if old != value {
            self.dirty = true;
        }
        Ok(old)
    }

    /// Initialises a cell during bulk population. Unlike
    /// [`Chunk::set_cell`] the chunk is marked dirty unconditionally.
    pub fn init_cell(&mut self, offset: u32, value: V) -> Result<()> {
        self.set_cell(offset, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn for_each_data(&self, mut f: impl FnMut(u32, V)) {
        self.store.for_each_data(&mut f);
    }

    /// Every cell in offset order, no-data included.
    pub fn values(&self) -> impl Iterator<Item = (u32, V)> + '_ {
        (0..self.len()).map(move |offset| (offset, self.store.get(offset)))
    }
}
