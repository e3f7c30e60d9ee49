//! # Grid Builder
//!
//! Configures and creates a new grid directory.
//!
//! | Option      | Default                         |
//! |-------------|---------------------------------|
//! | dir         | required                        |
//! | shape       | required                        |
//! | chunk_shape | 64 x 64                         |
//! | dimensions  | unit cells, origin at (0, 0)    |
//! | nodata      | `i32::MIN` / `-f64::MAX`        |
//! | encoding    | `Array`                         |
//! | stats_mode  | `Incremental`                   |
//!
//! ```ignore
//! let grid = Grid::<f64>::builder()
//!     .dir("./elevation")
//!     .shape(4000, 6000)
//!     .chunk_shape(128, 128)
//!     .encoding(ChunkEncoding::Sparse)
//!     .create(&env)?;
//! ```

use std::path::PathBuf;

use eyre::{ensure, eyre, Result};

use super::{CellValue, Grid, GridShape, PersistedStats, StatsMode};
use crate::chunk::ChunkEncoding;
use crate::config::{DEFAULT_CHUNK_NCOLS, DEFAULT_CHUNK_NROWS};
use crate::environment::Environment;
use crate::geometry::Dimensions;
use crate::storage::{GridFiles, GridMetadata};

pub struct GridBuilder<V: CellValue> {
    dir: Option<PathBuf>,
    shape: Option<(i64, i64)>,
    chunk_shape: (i32, i32),
    dimensions: Option<Dimensions>,
    nodata: V,
    encoding: ChunkEncoding,
    stats_mode: StatsMode,
}

impl<V: CellValue> Default for GridBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CellValue> GridBuilder<V> {
    pub fn new() -> Self {
        Self {
            dir: None,
            shape: None,
            chunk_shape: (DEFAULT_CHUNK_NROWS, DEFAULT_CHUNK_NCOLS),
            dimensions: None,
            nodata: V::default_nodata(),
            encoding: ChunkEncoding::Array,
            stats_mode: StatsMode::default(),
        }
    }

    /// Directory that will hold grid.meta and the chunk files. Created if
    /// missing; must not already hold a grid.
    pub fn dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn shape(mut self, nrows: i64, ncols: i64) -> Self {
        self.shape = Some((nrows, ncols));
        self
    }

    pub fn chunk_shape(mut self, chunk_nrows: i32, chunk_ncols: i32) -> Self {
        self.chunk_shape = (chunk_nrows, chunk_ncols);
        self
    }

    /// Cell size and bounding box. The box must span exactly `nrows` by
    /// `ncols` cells.
    pub fn dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn nodata(mut self, nodata: V) -> Self {
        self.nodata = nodata;
        self
    }

    /// Encoding given to every chunk the grid creates.
    pub fn encoding(mut self, encoding: ChunkEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn stats_mode(mut self, mode: StatsMode) -> Self {
        self.stats_mode = mode;
        self
    }

    pub fn create(self, env: &Environment) -> Result<Grid<V>> {
        let dir = self.dir.ok_or_else(|| eyre!("grid directory not set"))?;
        let (nrows, ncols) = self.shape.ok_or_else(|| eyre!("grid shape not set"))?;
        let shape = GridShape::new(nrows, ncols, self.chunk_shape.0, self.chunk_shape.1)?;

        let dimensions = match self.dimensions {
            Some(dimensions) => {
                let expected = Dimensions::from_origin(
                    dimensions.cellsize().clone(),
                    dimensions.xmin().clone(),
                    dimensions.ymin().clone(),
                    nrows,
                    ncols,
                )?;
                ensure!(
                    dimensions == expected,
                    "bounding box {:?} does not span {}x{} cells of size {}",
                    dimensions.to_strings(),
                    nrows,
                    ncols,
                    dimensions.cellsize()
                );
                dimensions
            }
            None => Dimensions::unit(nrows, ncols),
        };

        let meta = GridMetadata {
            value_type: V::TYPE_TAG,
            shape,
            dimensions,
            nodata_bits: self.nodata.to_bits(),
            encoding: self.encoding,
            stats_mode: self.stats_mode,
            stats: PersistedStats {
                valid: true,
                ..PersistedStats::default()
            },
            generation: 0,
        };
        Grid::create(env, GridFiles::new(dir), meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use tempfile::tempdir;

    fn env() -> Environment {
        Environment::builder()
            .memory_budget(1 << 20)
            .cushion_bytes(1024)
            .open()
            .unwrap()
    }

    #[test]
    fn test_create_requires_dir_and_shape() {
        let env = env();
        assert!(GridBuilder::<i32>::new().shape(4, 4).create(&env).is_err());

        let dir = tempdir().unwrap();
        assert!(GridBuilder::<i32>::new().dir(dir.path()).create(&env).is_err());
    }

    #[test]
    fn test_create_rejects_bad_chunk_shape() {
        let env = env();
        let dir = tempdir().unwrap();
        let err = GridBuilder::<i32>::new()
            .dir(dir.path())
            .shape(4, 4)
            .chunk_shape(0, 4)
            .create(&env)
            .unwrap_err();
        assert!(err.downcast_ref::<crate::grid::ShapeInvariantViolation>().is_some());
    }

    #[test]
    fn test_create_rejects_mismatched_dimensions() {
        let env = env();
        let dir = tempdir().unwrap();
        let dims = Dimensions::from_origin(
            BigDecimal::from_str("2.5").unwrap(),
            BigDecimal::from(0),
            BigDecimal::from(0),
            4,
            5,
        )
        .unwrap();
        assert!(GridBuilder::<f64>::new()
            .dir(dir.path())
            .shape(4, 4)
            .dimensions(dims)
            .create(&env)
            .is_err());
    }

    #[test]
    fn test_create_refuses_existing_grid() {
        let env = env();
        let dir = tempdir().unwrap();
        let grid = GridBuilder::<i32>::new()
            .dir(dir.path())
            .shape(3, 3)
            .create(&env)
            .unwrap();
        assert_eq!(grid.nodata(), i32::MIN);
        assert_eq!(grid.default_encoding(), ChunkEncoding::Array);

        assert!(GridBuilder::<i32>::new()
            .dir(dir.path())
            .shape(3, 3)
            .create(&env)
            .is_err());
    }
}
