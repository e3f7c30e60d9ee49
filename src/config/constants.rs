//! # Grids Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_CHUNK_NROWS x DEFAULT_CHUNK_NCOLS
//!       │
//!       └─> MAX_CHUNK_CELLS (must be >=)
//!             Intra-chunk offsets are u32, so a chunk can never hold more
//!             cells than a u32 can index.
//!
//! CHUNK_HEADER_SIZE (64 bytes)
//!       │
//!       └─> every chunk file and every snapshot record starts with it
//!
//! GRID_HEADER_SIZE (128 bytes)
//!       │
//!       └─> grid.meta, followed by the dimension strings
//!
//! DEFAULT_CUSHION_BYTES
//!       │
//!       └─> must cover at least one encode buffer for a default-shaped
//!           f64 chunk, otherwise releasing the cushion cannot guarantee
//!           that the first eviction gets to write its chunk
//! ```
//!
//! ## Memory Accounting Estimates
//!
//! | Item                 | Estimate               | Rationale                          |
//! |----------------------|------------------------|------------------------------------|
//! | Resident chunk       | heap bytes + 96        | Chunk struct, map slot, lease      |
//! | Sparse entry         | 16 bytes               | u32 key + 8-byte value + hash slot |
//! | Mapped chunk         | 96 bytes               | Values live in the page cache      |
//!
//! Estimates slightly over-count. The goal is to keep the resident set inside
//! the budget, not byte-exact accounting.

// ============================================================================
// CHUNK SHAPE
// ============================================================================

/// Default number of cell rows per chunk.
pub const DEFAULT_CHUNK_NROWS: i32 = 64;

/// Default number of cell columns per chunk.
pub const DEFAULT_CHUNK_NCOLS: i32 = 64;

/// Intra-chunk offsets are stored as u32.
pub const MAX_CHUNK_CELLS: u64 = u32::MAX as u64;

/// Chunk coordinates are i32, so the chunk count of one grid must fit.
pub const MAX_CHUNKS_PER_GRID: u64 = i32::MAX as u64;

const _: () = assert!(
    (DEFAULT_CHUNK_NROWS as u64) * (DEFAULT_CHUNK_NCOLS as u64) <= MAX_CHUNK_CELLS,
    "default chunk shape must be addressable by a u32 offset"
);

// ============================================================================
// MEMORY BUDGET
// ============================================================================

/// Percentage of system RAM used when the budget is auto-detected.
pub const DEFAULT_BUDGET_PERCENT: usize = 25;

/// Floor applied to auto-detected budgets.
pub const MIN_BUDGET_FLOOR: usize = 4 * 1024 * 1024;

/// Bytes held back by the environment and released the moment allocation
/// pressure is detected.
pub const DEFAULT_CUSHION_BYTES: usize = 64 * 1024;

/// Fixed per-chunk accounting overhead on top of its value storage.
pub const CHUNK_OVERHEAD_BYTES: usize = 96;

/// Estimated cost of one populated entry in a sparse chunk.
pub const SPARSE_ENTRY_BYTES: usize = 16;

const _: () = assert!(
    DEFAULT_CUSHION_BYTES
        >= CHUNK_HEADER_SIZE
            + (DEFAULT_CHUNK_NROWS as usize) * (DEFAULT_CHUNK_NCOLS as usize) * 8,
    "cushion must cover one encode buffer of a default f64 chunk"
);

// ============================================================================
// FILE LAYOUT
// ============================================================================

/// Size of the header at the start of every chunk file.
pub const CHUNK_HEADER_SIZE: usize = 64;

/// Size of the fixed header at the start of grid.meta.
pub const GRID_HEADER_SIZE: usize = 128;

/// Size of the header at the start of the resident-set snapshot.
pub const SNAPSHOT_HEADER_SIZE: usize = 32;

pub const META_FILE_NAME: &str = "grid.meta";
pub const SNAPSHOT_FILE_NAME: &str = "resident.cache";
pub const CHUNK_DIR_NAME: &str = "chunks";
pub const CHUNK_FILE_EXTENSION: &str = "chunk";

/// Current on-disk format version shared by all grid files.
pub const FORMAT_VERSION: u32 = 1;
