//! Identity types for grids, chunks and cells.

/// Identity assigned to a grid when it registers with an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub(crate) u64);

impl GridId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GridId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid#{}", self.0)
    }
}

/// Position of a chunk within its grid's partitioning.
///
/// Only meaningful together with the owning [`GridId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkId {
    pub row: i32,
    pub col: i32,
}

impl ChunkId {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Global cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CellId {
    pub row: i64,
    pub col: i64,
}

impl CellId {
    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// The 8-connected neighbours, clockwise from north-west. May lie outside
    /// any grid.
    pub fn neighbours(&self) -> [CellId; 8] {
        let (r, c) = (self.row, self.col);
        [
            CellId::new(r + 1, c - 1),
            CellId::new(r + 1, c),
            CellId::new(r + 1, c + 1),
            CellId::new(r, c + 1),
            CellId::new(r - 1, c + 1),
            CellId::new(r - 1, c),
            CellId::new(r - 1, c - 1),
            CellId::new(r, c - 1),
        ]
    }

    /// Chebyshev (8-connected ring) distance.
    pub fn ring_distance(&self, other: &CellId) -> i64 {
        (self.row - other.row)
            .abs()
            .max((self.col - other.col).abs())
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.row, self.col)
    }
}
