//! # grids - Out-of-Core Chunked Raster Store
//!
//! `grids` stores large 2D rasters of `i32` or `f64` cells. Each grid is
//! partitioned into rectangular chunks, and only the chunks in use are kept
//! in memory: the rest live in per-chunk files and are loaded on demand.
//!
//! - **Explicit memory budget**: every resident chunk and every I/O buffer is
//!   charged to a shared byte budget, so memory use is bounded and observable
//! - **Evict and retry**: when the budget refuses an allocation, the grid
//!   evicts chunks (persisting them first) and retries instead of failing
//! - **Exact geometry**: cell size and bounding box are kept as decimals
//!
//! ## Quick Start
//!
//! ```ignore
//! use grids::{Environment, Grid};
//!
//! let env = Environment::builder()
//!     .memory_budget(64 * 1024 * 1024)
//!     .open()?;
//!
//! let grid = Grid::<f64>::builder()
//!     .dir("./elevation")
//!     .shape(10_000, 10_000)
//!     .create(&env)?;
//!
//! grid.set_cell(42, 17, 3.5)?;
//! assert_eq!(grid.get_cell(42, 17)?, 3.5);
//! grid.close()?;
//!
//! let grid = Grid::<f64>::open(&env, "./elevation")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Grid<V> (cell API, retry loop)    │   io::ascii import/export
//! ├──────────────────┬──────────────────┤
//! │  ChunkDirectory  │  GridStats       │
//! ├──────────────────┴──────────────────┤
//! │  Chunk (Array/Sparse/BitPacked/Map) │
//! ├─────────────────────────────────────┤
//! │  storage: chunk files, grid.meta,   │
//! │           resident-set snapshot     │
//! └─────────────────────────────────────┘
//!         ▲                   │ charges
//!         │ evicts            ▼
//! ┌─────────────────────────────────────┐
//! │  Environment  ─────  MemoryBudget   │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! grid_dir/
//! ├── grid.meta            # Shape, geometry, no-data, statistics
//! ├── resident.cache       # Optional resident-set snapshot
//! └── chunks/
//!     ├── 0_0.chunk        # One file per persisted chunk
//!     └── 0_1.chunk
//! ```
//!
//! ## Module Overview
//!
//! - [`grid`]: the grid façade, address translation, statistics, search
//! - [`chunk`]: chunk encodings
//! - [`environment`]: eviction controller and memory cushion
//! - [`memory`]: the byte budget and its leases
//! - [`storage`]: chunk files, metadata and snapshots
//! - [`geometry`]: cell size and bounding box
//! - [`io`]: ESRI ASCII grid import and export

#[macro_use]
mod macros;

pub mod chunk;
pub mod config;
pub mod environment;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod memory;
pub mod storage;

pub use chunk::ChunkEncoding;
pub use environment::{Environment, EnvironmentBuilder, EvictionReport, PersistSummary};
pub use geometry::Dimensions;
pub use grid::{
    CellId, CellValue, ChunkId, Grid, GridBuilder, GridId, NearestValues, OnPressure, StatsMode,
    StatsSummary,
};
pub use memory::{is_allocation_pressure, AllocationPressure, MemoryBudget};
pub use storage::{storage_error, StorageError, StorageErrorKind};
