//! # Address Translation
//!
//! [`GridShape`] maps between global cell coordinates, chunk coordinates and
//! intra-chunk offsets. It holds nothing but the four shape parameters and the
//! two derived chunk counts, fixed at construction.
//!
//! ## Partitioning
//!
//! ```text
//! nrows = 10, ncols = 10, chunk_nrows = 4, chunk_ncols = 4
//!
//!   col:  0 1 2 3 | 4 5 6 7 | 8 9
//!        +--------+---------+----+
//! row 0  | (0,0)  |  (0,1)  |(0,2)
//!   ...  |  4x4   |   4x4   | 4x2|
//! row 3  |        |         |    |
//!        +--------+---------+----+
//! row 4  | (1,0)  |  (1,1)  |(1,2)
//!   ...  |        |         |    |
//!        +--------+---------+----+
//! row 8  | (2,0)  |  (2,1)  |(2,2)
//! row 9  |  2x4   |   2x4   | 2x2|
//!        +--------+---------+----+
//! ```
//!
//! The last chunk row and column are clipped to the grid extent. Code that
//! walks a chunk's interior must use [`GridShape::chunk_nrows_of`] and
//! [`GridShape::chunk_ncols_of`], never the nominal chunk shape.
//!
//! ## Offsets
//!
//! Cells inside a chunk are addressed row-major by a `u32` offset computed
//! against the chunk's *effective* column count, so an edge chunk stores
//! exactly `chunk_nrows_of * chunk_ncols_of` cells.

use eyre::Result;

use super::ids::{CellId, ChunkId};
use crate::config::{MAX_CHUNKS_PER_GRID, MAX_CHUNK_CELLS};

/// The grid shape cannot be represented: the grid is misconfigured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeInvariantViolation {
    pub reason: String,
}

impl std::fmt::Display for ShapeInvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid grid shape: {}", self.reason)
    }
}

impl std::error::Error for ShapeInvariantViolation {}

fn violation(reason: String) -> eyre::Report {
    eyre::Report::new(ShapeInvariantViolation { reason })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    nrows: i64,
    ncols: i64,
    chunk_nrows: i32,
    chunk_ncols: i32,
    nchunk_rows: i32,
    nchunk_cols: i32,
}

impl GridShape {
    pub fn new(nrows: i64, ncols: i64, chunk_nrows: i32, chunk_ncols: i32) -> Result<Self> {
        if nrows <= 0 || ncols <= 0 {
            return Err(violation(format!(
                "grid extent must be positive, got {}x{}",
                nrows, ncols
            )));
        }
        if chunk_nrows <= 0 || chunk_ncols <= 0 {
            return Err(violation(format!(
                "chunk shape must be positive, got {}x{}",
                chunk_nrows, chunk_ncols
            )));
        }

        let chunk_cells = chunk_nrows as u64 * chunk_ncols as u64;
        if chunk_cells > MAX_CHUNK_CELLS {
            return Err(violation(format!(
                "chunk of {} cells exceeds the addressable maximum {}",
                chunk_cells, MAX_CHUNK_CELLS
            )));
        }

        let nchunk_rows = div_ceil(nrows, chunk_nrows as i64);
        let nchunk_cols = div_ceil(ncols, chunk_ncols as i64);
        let nchunks = (nchunk_rows as u128) * (nchunk_cols as u128);
        if nchunks > MAX_CHUNKS_PER_GRID as u128 {
            return Err(violation(format!(
                "{} chunks ({}x{}) exceed the addressable maximum {}",
                nchunks, nchunk_rows, nchunk_cols, MAX_CHUNKS_PER_GRID
            )));
        }

        Ok(Self {
            nrows,
            ncols,
            chunk_nrows,
            chunk_ncols,
            nchunk_rows: nchunk_rows as i32,
            nchunk_cols: nchunk_cols as i32,
        })
    }

    pub fn nrows(&self) -> i64 {
        self.nrows
    }

    pub fn ncols(&self) -> i64 {
        self.ncols
    }

    pub fn chunk_nrows(&self) -> i32 {
        self.chunk_nrows
    }

    pub fn chunk_ncols(&self) -> i32 {
        self.chunk_ncols
    }

    pub fn nchunk_rows(&self) -> i32 {
        self.nchunk_rows
    }

    pub fn nchunk_cols(&self) -> i32 {
        self.nchunk_cols
    }

    pub fn nchunks(&self) -> u64 {
        self.nchunk_rows as u64 * self.nchunk_cols as u64
    }

    pub fn ncells(&self) -> u128 {
        self.nrows as u128 * self.ncols as u128
    }

    pub fn chunk_row(&self, row: i64) -> i32 {
        row.div_euclid(self.chunk_nrows as i64) as i32
    }

    pub fn chunk_col(&self, col: i64) -> i32 {
        col.div_euclid(self.chunk_ncols as i64) as i32
    }

    pub fn chunk_cell_row(&self, row: i64) -> i32 {
        row.rem_euclid(self.chunk_nrows as i64) as i32
    }

    pub fn chunk_cell_col(&self, col: i64) -> i32 {
        col.rem_euclid(self.chunk_ncols as i64) as i32
    }

    pub fn cell_row(&self, chunk_row: i32, chunk_cell_row: i32) -> i64 {
        chunk_row as i64 * self.chunk_nrows as i64 + chunk_cell_row as i64
    }

    pub fn cell_col(&self, chunk_col: i32, chunk_cell_col: i32) -> i64 {
        chunk_col as i64 * self.chunk_ncols as i64 + chunk_cell_col as i64
    }

    pub fn is_in_grid(&self, row: i64, col: i64) -> bool {
        (0..self.nrows).contains(&row) && (0..self.ncols).contains(&col)
    }

    pub fn contains_cell(&self, cell: CellId) -> bool {
        self.is_in_grid(cell.row, cell.col)
    }

    pub fn is_valid_chunk(&self, id: ChunkId) -> bool {
        (0..self.nchunk_rows).contains(&id.row) && (0..self.nchunk_cols).contains(&id.col)
    }

    /// Chunk holding the cell, or `None` for cells outside the grid.
    pub fn chunk_id(&self, row: i64, col: i64) -> Option<ChunkId> {
        if !self.is_in_grid(row, col) {
            return None;
        }
        Some(ChunkId::new(self.chunk_row(row), self.chunk_col(col)))
    }

    /// Effective row count of chunks in `chunk_row`; the last chunk row may be
    /// shorter than nominal.
    pub fn chunk_nrows_of(&self, chunk_row: i32) -> i32 {
        if chunk_row == self.nchunk_rows - 1 {
            (self.nrows - chunk_row as i64 * self.chunk_nrows as i64) as i32
        } else {
            self.chunk_nrows
        }
    }

    pub fn chunk_ncols_of(&self, chunk_col: i32) -> i32 {
        if chunk_col == self.nchunk_cols - 1 {
            (self.ncols - chunk_col as i64 * self.chunk_ncols as i64) as i32
        } else {
            self.chunk_ncols
        }
    }

    pub fn chunk_dims(&self, id: ChunkId) -> (u32, u32) {
        (
            self.chunk_nrows_of(id.row) as u32,
            self.chunk_ncols_of(id.col) as u32,
        )
    }

    /// Row-major offset of an in-grid cell within its chunk.
    pub fn offset(&self, row: i64, col: i64) -> u32 {
        let chunk_ncols = self.chunk_ncols_of(self.chunk_col(col)) as u32;
        self.chunk_cell_row(row) as u32 * chunk_ncols + self.chunk_cell_col(col) as u32
    }

    /// Inverse of [`GridShape::offset`] for a given chunk.
    pub fn cell_at(&self, id: ChunkId, offset: u32) -> CellId {
        let chunk_ncols = self.chunk_ncols_of(id.col) as u32;
        CellId::new(
            self.cell_row(id.row, (offset / chunk_ncols) as i32),
            self.cell_col(id.col, (offset % chunk_ncols) as i32),
        )
    }

    /// All chunk ids in row-major order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        (0..self.nchunk_rows)
            .flat_map(move |r| (0..self.nchunk_cols).map(move |c| ChunkId::new(r, c)))
    }
}

// Callers guarantee `a > 0` and `b > 0`.
fn div_ceil(a: i64, b: i64) -> i64 {
    (a - 1) / b + 1
}
