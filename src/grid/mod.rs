//! # Grids
//!
//! A [`Grid`] is a 2D raster of one [`CellValue`] type, partitioned into
//! chunks that move between memory and per-chunk files as the shared memory
//! budget demands.
//!
//! ## Structure
//!
//! ```text
//! Grid<V> ----------------------> Environment (shared, cloneable)
//!   |                                  ^
//!   v                                  | weak, as dyn Evictable
//! Arc<GridCore<V>> --------------------+
//!   shape, dimensions, files, nodata
//!   Mutex<GridState<V>>
//!     ChunkDirectory<V>   resident chunks
//!     GridStats<V>        running statistics
//!     generation          last grid.meta write
//! ```
//!
//! ## Retry Protocol
//!
//! Every cell-level operation runs as one or more *steps*, each touching a
//! single chunk. [`Grid::run`] locks the state, runs the step and unlocks.
//! When the step fails with allocation pressure and the caller chose
//! [`OnPressure::Evict`], the grid asks the environment to relieve pressure
//! while protecting the step's chunk, then runs the step again:
//!
//! ```text
//! loop {
//!     lock; result = step(); unlock
//!     Ok                      -> return
//!     other error             -> return
//!     pressure, Propagate     -> return
//!     pressure, Evict:
//!         bound = resident chunks + 1   (first failure only)
//!         bound exhausted     -> return
//!         relieve_pressure(protected)
//!         nothing evicted     -> return
//! }
//! ```
//!
//! Multi-chunk operations (neighbourhoods, searches, scans, flushes) are
//! sequences of steps and never hold the lock across chunks.
//!
//! ## Out-of-Range Access
//!
//! Reads outside the grid return no-data; writes outside the grid are no-ops
//! that return no-data. Neither is an error.

mod builder;
mod directory;
mod ids;
mod nearest;
mod shape;
mod stats;
mod value;

use std::path::Path;
use std::sync::{Arc, Weak};

use bigdecimal::BigDecimal;
use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use builder::GridBuilder;
pub use directory::ChunkDirectory;
pub use ids::{CellId, ChunkId, GridId};
pub use nearest::NearestValues;
pub use shape::{GridShape, ShapeInvariantViolation};
pub use stats::{GridStats, PersistedStats, StatsMode, StatsSummary};
pub use value::CellValue;

use crate::chunk::{Chunk, ChunkEncoding};
use crate::environment::{Environment, Evictable, EvictionReport, ProtectedSet};
use crate::geometry::Dimensions;
use crate::memory::{is_allocation_pressure, MemoryBudget};
use crate::storage::{snapshot, swap, GridFiles, GridMetadata};

/// What a cell operation does when the budget refuses an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPressure {
    /// Evict chunks through the environment and retry.
    #[default]
    Evict,
    /// Return the allocation pressure to the caller untouched.
    Propagate,
}

struct GridState<V: CellValue> {
    directory: ChunkDirectory<V>,
    stats: GridStats<V>,
    generation: u64,
    /// Cells or statistics changed since grid.meta was last written.
    meta_dirty: bool,
}

struct GridCore<V: CellValue> {
    id: GridId,
    files: GridFiles,
    shape: GridShape,
    dimensions: Dimensions,
    nodata: V,
    encoding: ChunkEncoding,
    budget: Arc<MemoryBudget>,
    state: Mutex<GridState<V>>,
}

impl<V: CellValue> GridCore<V> {
    fn load_chunk(&self, id: ChunkId) -> Result<Chunk<V>> {
        let dims = self.shape.chunk_dims(id);
        if swap::exists(&self.files, id) {
            return swap::load(&self.files, self.id, id, dims, self.nodata, &self.budget);
        }

        let chunk = if self.encoding == ChunkEncoding::Mapped {
            swap::create_mapped(&self.files, self.id, id, dims, self.nodata, &self.budget)?
        } else {
            Chunk::empty(self.id, id, dims.0, dims.1, self.encoding, self.nodata, &self.budget)?
        };
        debug!(
            "created chunk {} of {} ({})",
            id,
            self.id,
            self.encoding.name()
        );
        Ok(chunk)
    }

    /// The chunk, loading or creating it when it is not resident.
    fn chunk_mut<'s>(&self, state: &'s mut GridState<V>, id: ChunkId) -> Result<&'s mut Chunk<V>> {
        state.directory.get_or_load(id, || self.load_chunk(id))
    }

    /// The chunk if it is resident or was ever persisted. A chunk that is
    /// neither holds nothing but no-data and is not created.
    fn existing_chunk<'s>(
        &self,
        state: &'s mut GridState<V>,
        id: ChunkId,
    ) -> Result<Option<&'s mut Chunk<V>>> {
        if state.directory.contains(id) || swap::exists(&self.files, id) {
            return self.chunk_mut(state, id).map(Some);
        }
        Ok(None)
    }

    fn metadata(&self, state: &GridState<V>) -> GridMetadata {
        GridMetadata {
            value_type: V::TYPE_TAG,
            shape: self.shape,
            dimensions: self.dimensions.clone(),
            nodata_bits: self.nodata.to_bits(),
            encoding: self.encoding,
            stats_mode: state.stats.mode(),
            stats: state.stats.to_persisted(self.nodata),
            generation: state.generation,
        }
    }
}

impl<V: CellValue> Evictable for GridCore<V> {
    fn grid_id(&self) -> GridId {
        self.id
    }

    fn resident_chunk_ids(&self) -> Vec<ChunkId> {
        self.state.lock().directory.ids()
    }

    fn resident_len(&self) -> usize {
        self.state.lock().directory.len()
    }

    fn swap_chunk(&self, id: ChunkId) -> bool {
        let mut state = self.state.lock();
        let Some(chunk) = state.directory.get_mut(id) else {
            return false;
        };
        if !swap::save(&self.files, chunk, &self.budget).is_persisted() {
            return false;
        }
        state.directory.remove(id);
        debug!("evicted chunk {} of {}", id, self.id);
        true
    }

    fn persist_chunk(&self, id: ChunkId) -> bool {
        let mut state = self.state.lock();
        match state.directory.get_mut(id) {
            Some(chunk) => swap::save(&self.files, chunk, &self.budget).is_persisted(),
            None => true,
        }
    }
}

/// A chunked raster of `V` values registered with an [`Environment`].
///
/// Dropping a grid persists its dirty chunks and metadata on a best-effort
/// basis; call [`Grid::flush`] or [`Grid::close`] to see failures.
pub struct Grid<V: CellValue> {
    core: Arc<GridCore<V>>,
    env: Environment,
    closed: bool,
}

impl<V: CellValue> std::fmt::Debug for Grid<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("id", &self.core.id)
            .field("type", &V::NAME)
            .field("shape", &self.core.shape)
            .field("dir", &self.core.files.root())
            .field("resident", &self.resident_chunk_count())
            .finish()
    }
}

impl<V: CellValue> Grid<V> {
    pub fn builder() -> GridBuilder<V> {
        GridBuilder::new()
    }

    fn assemble(env: &Environment, files: GridFiles, meta: &GridMetadata) -> Self {
        let id = env.allocate_grid_id();
        let core = Arc::new(GridCore {
            id,
            files,
            shape: meta.shape,
            dimensions: meta.dimensions.clone(),
            nodata: V::from_bits(meta.nodata_bits),
            encoding: meta.encoding,
            budget: Arc::clone(env.budget()),
            state: Mutex::new(GridState {
                directory: ChunkDirectory::new(),
                stats: GridStats::from_persisted(meta.stats_mode, meta.stats),
                generation: meta.generation,
                meta_dirty: false,
            }),
        });
        let evictable: Arc<dyn Evictable> = core.clone();
        let weak: Weak<dyn Evictable> = Arc::downgrade(&evictable);
        env.register(id, weak);

        Self {
            core,
            env: env.clone(),
            closed: false,
        }
    }

    /// Creates a new grid in `files`, writing its initial metadata.
    pub(crate) fn create(env: &Environment, files: GridFiles, meta: GridMetadata) -> Result<Self> {
        ensure!(
            meta.value_type == V::TYPE_TAG,
            "metadata describes value type tag {}, expected {}",
            meta.value_type,
            V::TYPE_TAG
        );
        ensure!(
            !files.meta_path().exists(),
            "'{}' already holds a grid",
            files.root().display()
        );
        files.create_dirs()?;
        meta.write(&files)?;

        let grid = Self::assemble(env, files, &meta);
        info!(
            "created {} grid {} ({}x{}, chunks {}x{}, {}) at '{}'",
            V::NAME,
            grid.id(),
            meta.shape.nrows(),
            meta.shape.ncols(),
            meta.shape.chunk_nrows(),
            meta.shape.chunk_ncols(),
            meta.encoding.name(),
            grid.dir().display()
        );
        Ok(grid)
    }

    /// Reopens a grid from its directory. Chunks captured by a matching
    /// resident-set snapshot are preloaded while the budget allows.
    pub fn open<P: AsRef<Path>>(env: &Environment, dir: P) -> Result<Self> {
        let files = GridFiles::new(dir.as_ref());
        let meta = GridMetadata::read(&files)
            .wrap_err_with(|| format!("failed to open grid at '{}'", files.root().display()))?;
        ensure!(
            meta.value_type == V::TYPE_TAG,
            "grid at '{}' has value type tag {}, expected {} (tag {})",
            files.root().display(),
            meta.value_type,
            V::NAME,
            V::TYPE_TAG
        );

        let grid = Self::assemble(env, files, &meta);
        let preloaded = {
            let core = &grid.core;
            let mut state = core.state.lock();
            snapshot::preload(
                &core.files,
                meta.generation,
                core.id,
                &core.shape,
                core.nodata,
                &core.budget,
                |chunk| {
                    state.directory.put(chunk.id(), chunk);
                },
            )
        };
        let preloaded = preloaded.unwrap_or_else(|e| {
            warn!("abandoned snapshot preload for {}: {:#}", grid.id(), e);
            0
        });

        info!(
            "opened {} grid {} at '{}' (generation {}, {} chunks preloaded)",
            V::NAME,
            grid.id(),
            grid.dir().display(),
            meta.generation,
            preloaded
        );
        Ok(grid)
    }

    pub fn id(&self) -> GridId {
        self.core.id
    }

    pub fn shape(&self) -> &GridShape {
        &self.core.shape
    }

    pub fn nrows(&self) -> i64 {
        self.core.shape.nrows()
    }

    pub fn ncols(&self) -> i64 {
        self.core.shape.ncols()
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.core.dimensions
    }

    pub fn nodata(&self) -> V {
        self.core.nodata
    }

    /// Encoding given to chunks created by this grid.
    pub fn default_encoding(&self) -> ChunkEncoding {
        self.core.encoding
    }

    pub fn dir(&self) -> &Path {
        self.core.files.root()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Runs `step` under the retry protocol. `protect` names the chunks the
    /// step touches; they are never evicted to make room for it.
    fn run<R>(
        &self,
        on_pressure: OnPressure,
        protect: &[ChunkId],
        mut step: impl FnMut(&GridCore<V>, &mut GridState<V>) -> Result<R>,
    ) -> Result<R> {
        let mut remaining: Option<usize> = None;
        loop {
            let result = {
                let mut state = self.core.state.lock();
                step(&self.core, &mut state)
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if on_pressure == OnPressure::Propagate || !is_allocation_pressure(&err) {
                return Err(err);
            }

            let left = remaining.get_or_insert_with(|| self.env.resident_chunks() + 1);
            if *left == 0 {
                return Err(err.wrap_err(format!(
                    "{}: still out of memory after evicting every candidate",
                    self.core.id
                )));
            }
            *left -= 1;

            let protected: ProtectedSet = protect.iter().map(|id| (self.core.id, *id)).collect();
            let report = self.env.relieve_pressure(self.core.id, &protected);
            if report.is_empty() {
                return Err(err.wrap_err(format!(
                    "{}: out of memory and no chunk could be evicted",
                    self.core.id
                )));
            }
            debug!(
                "{} retrying after evicting {} chunks",
                self.core.id,
                report.len()
            );
        }
    }

    pub fn get_cell(&self, row: i64, col: i64) -> Result<V> {
        self.get_cell_with(row, col, OnPressure::Evict)
    }

    /// Value of a cell, or no-data outside the grid. Reading a chunk that
    /// was never written does not create it.
    pub fn get_cell_with(&self, row: i64, col: i64, on_pressure: OnPressure) -> Result<V> {
        let Some(id) = self.core.shape.chunk_id(row, col) else {
            return Ok(self.core.nodata);
        };
        let offset = self.core.shape.offset(row, col);
        self.run(on_pressure, &[id], |core, state| {
            Ok(match core.existing_chunk(state, id)? {
                Some(chunk) => chunk.get_cell(offset),
                None => core.nodata,
            })
        })
    }

    /// Value of the cell containing the point `(x, y)`, or no-data outside
    /// the grid's bounding box.
    pub fn get_value_at(&self, x: &BigDecimal, y: &BigDecimal) -> Result<V> {
        if !self.core.dimensions.contains(x, y) {
            return Ok(self.core.nodata);
        }
        let row = self.core.dimensions.cell_row(y, self.nrows());
        let col = self.core.dimensions.cell_col(x, self.ncols());
        self.get_cell(row, col)
    }

    pub fn set_cell(&self, row: i64, col: i64, value: V) -> Result<V> {
        self.set_cell_with(row, col, value, OnPressure::Evict)
    }

    /// Stores `value` and returns the previous value. Writes outside the grid
    /// are ignored and return no-data.
    pub fn set_cell_with(&self, row: i64, col: i64, value: V, on_pressure: OnPressure) -> Result<V> {
        let Some(id) = self.core.shape.chunk_id(row, col) else {
            return Ok(self.core.nodata);
        };
        let offset = self.core.shape.offset(row, col);
        self.run(on_pressure, &[id], |core, state| {
            let old = core.chunk_mut(state, id)?.set_cell(offset, value)?;
            if old != value {
                state.stats.record(old, value, core.nodata);
                state.meta_dirty = true;
            }
            Ok(old)
        })
    }

    /// Sets a cell during bulk population. The chunk is marked dirty even
    /// when the value does not change.
    pub fn init_cell(&self, row: i64, col: i64, value: V) -> Result<()> {
        let Some(id) = self.core.shape.chunk_id(row, col) else {
            return Ok(());
        };
        let offset = self.core.shape.offset(row, col);
        self.run(OnPressure::Evict, &[id], |core, state| {
            let chunk = core.chunk_mut(state, id)?;
            let old = chunk.get_cell(offset);
            chunk.init_cell(offset, value)?;
            if old != value {
                state.stats.record(old, value, core.nodata);
            }
            state.meta_dirty = true;
            Ok(())
        })
    }

    /// The eight neighbour values, clockwise from north-west. Neighbours
    /// outside the grid read as no-data.
    pub fn neighbours(&self, row: i64, col: i64) -> Result<[V; 8]> {
        let mut values = [self.core.nodata; 8];
        for (slot, cell) in values.iter_mut().zip(CellId::new(row, col).neighbours()) {
            *slot = self.get_cell(cell.row, cell.col)?;
        }
        Ok(values)
    }

    /// Every in-grid cell whose centroid lies within `radius` cell units of
    /// the centroid of `(row, col)`, with its value.
    pub fn cells_within(&self, row: i64, col: i64, radius: f64) -> Result<Vec<(CellId, V)>> {
        let mut cells = Vec::new();
        if radius.is_nan() || radius < 0.0 {
            return Ok(cells);
        }
        let reach = radius.floor().min(self.nrows().max(self.ncols()) as f64) as i64;
        let centre = (row as f64 + 0.5, col as f64 + 0.5);
        for r in row.saturating_sub(reach).max(0)..=row.saturating_add(reach).min(self.nrows() - 1) {
            for c in col.saturating_sub(reach).max(0)..=col.saturating_add(reach).min(self.ncols() - 1) {
                let cell = CellId::new(r, c);
                if nearest::centroid_distance(centre, cell) <= radius {
                    cells.push((cell, self.get_cell(r, c)?));
                }
            }
        }
        Ok(cells)
    }

    fn scale(&self, found: Option<NearestValues>) -> Option<NearestValues> {
        let cellsize = self.core.dimensions.cellsize_f64();
        found.map(|mut nearest| {
            nearest.distance *= cellsize;
            nearest
        })
    }

    /// The data cells nearest to the centroid of `(row, col)`.
    pub fn nearest_values(&self, row: i64, col: i64) -> Result<Option<NearestValues>> {
        let start = CellId::new(row, col);
        let point = (row as f64 + 0.5, col as f64 + 0.5);
        let found = nearest::search(&self.core.shape, start, point, self.core.nodata, |cell| {
            self.get_cell(cell.row, cell.col)
        })?;
        Ok(self.scale(found))
    }

    /// The data cells nearest to the point `(x, y)`. `None` outside the
    /// bounding box or when the grid holds no value.
    pub fn nearest_values_at(&self, x: &BigDecimal, y: &BigDecimal) -> Result<Option<NearestValues>> {
        let dims = &self.core.dimensions;
        if !dims.contains(x, y) {
            return Ok(None);
        }
        let start = CellId::new(dims.cell_row(y, self.nrows()), dims.cell_col(x, self.ncols()));
        let point = dims.to_cell_units(x, y);
        let found = nearest::search(&self.core.shape, start, point, self.core.nodata, |cell| {
            self.get_cell(cell.row, cell.col)
        })?;
        Ok(self.scale(found))
    }

    /// Mean of the nearest data values to `(row, col)`.
    pub fn nearest_value(&self, row: i64, col: i64) -> Result<Option<f64>> {
        Ok(self.nearest_values(row, col)?.map(|nearest| nearest.mean))
    }

    /// Calls `f` for every cell of the grid, chunk by chunk, no-data
    /// included. `f` runs while the grid is locked and must not call back
    /// into this grid.
    pub fn for_each_cell(&self, mut f: impl FnMut(CellId, V)) -> Result<()> {
        let shape = self.core.shape;
        for id in shape.chunk_ids() {
            self.run(OnPressure::Evict, &[id], |core, state| {
                match core.existing_chunk(state, id)? {
                    Some(chunk) => {
                        for (offset, value) in chunk.values() {
                            f(shape.cell_at(id, offset), value);
                        }
                    }
                    None => {
                        let (nrows, ncols) = shape.chunk_dims(id);
                        for offset in 0..nrows * ncols {
                            f(shape.cell_at(id, offset), core.nodata);
                        }
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Current statistics, running a full scan first when they are stale.
    pub fn stats(&self) -> Result<StatsSummary<V>> {
        if self.core.state.lock().stats.is_stale() {
            self.recompute_stats()?;
        }
        Ok(self.core.state.lock().stats.summary())
    }

    pub fn stats_mode(&self) -> StatsMode {
        self.core.state.lock().stats.mode()
    }

    pub fn set_stats_mode(&self, mode: StatsMode) {
        let mut state = self.core.state.lock();
        if state.stats.mode() != mode {
            state.stats.set_mode(mode);
            state.meta_dirty = true;
        }
    }

    /// Rebuilds the statistics from every chunk that holds data.
    pub fn recompute_stats(&self) -> Result<()> {
        let mut scanned = self.core.state.lock().stats.fresh();
        for id in self.core.shape.chunk_ids() {
            self.run(OnPressure::Evict, &[id], |core, state| {
                if let Some(chunk) = core.existing_chunk(state, id)? {
                    chunk.for_each_data(|_, value| scanned.include(value));
                }
                Ok(())
            })?;
        }
        let mut state = self.core.state.lock();
        state.stats.replace_with(scanned);
        state.meta_dirty = true;
        drop(state);
        debug!("recomputed statistics of {}", self.core.id);
        Ok(())
    }

    pub fn resident_chunk_count(&self) -> usize {
        self.core.state.lock().directory.len()
    }

    pub fn is_resident(&self, id: ChunkId) -> bool {
        self.core.state.lock().directory.contains(id)
    }

    /// Encoding of a resident chunk.
    pub fn chunk_encoding(&self, id: ChunkId) -> Option<ChunkEncoding> {
        self.core.state.lock().directory.get(id).map(|chunk| chunk.encoding())
    }

    /// Persists and evicts one chunk. Returns `false` when it was not
    /// resident or could not be written.
    pub fn swap_chunk(&self, id: ChunkId) -> bool {
        self.core.swap_chunk(id)
    }

    /// Persists and evicts every resident chunk of this grid.
    pub fn evict_all(&self) -> EvictionReport {
        self.env.evict_all(self.core.id)
    }

    /// Persists one chunk, relieving pressure when the write buffer does not
    /// fit the budget.
    fn persist_with_relief(&self, id: ChunkId) -> bool {
        let protected: ProtectedSet = [(self.core.id, id)].into_iter().collect();
        let mut left = self.env.resident_chunks() + 1;
        loop {
            if self.core.persist_chunk(id) {
                return true;
            }
            if left == 0 || self.env.relieve_pressure(self.core.id, &protected).is_empty() {
                return false;
            }
            left -= 1;
        }
    }

    /// Persists every dirty chunk, then writes grid.meta under a new
    /// generation. A grid with nothing to write is left untouched, so a
    /// snapshot taken after the previous flush stays valid.
    pub fn flush(&self) -> Result<()> {
        let (dirty, meta_dirty) = {
            let state = self.core.state.lock();
            (state.directory.dirty_ids(), state.meta_dirty)
        };
        if dirty.is_empty() && !meta_dirty {
            return Ok(());
        }

        let failed = dirty
            .iter()
            .filter(|id| !self.persist_with_relief(**id))
            .count();
        ensure!(
            failed == 0,
            "{}: {} of {} dirty chunks could not be persisted",
            self.core.id,
            failed,
            dirty.len()
        );

        let meta = {
            let mut state = self.core.state.lock();
            state.generation += 1;
            state.meta_dirty = false;
            self.core.metadata(&state)
        };
        if let Err(e) = meta.write(&self.core.files) {
            self.core.state.lock().meta_dirty = true;
            return Err(e);
        }

        info!(
            "flushed {} ({} chunks written, generation {})",
            self.core.id,
            dirty.len(),
            meta.generation
        );
        Ok(())
    }

    /// Records which clean chunks are resident so [`Grid::open`] can
    /// preload them. Only meaningful right after [`Grid::flush`]: the
    /// snapshot is tied to the current metadata generation.
    pub fn write_snapshot(&self) -> Result<u32> {
        let core = &self.core;
        let state = core.state.lock();
        snapshot::write(
            &core.files,
            state.generation,
            state.directory.chunks(),
            &core.budget,
        )
    }

    /// Flushes, writes the resident-set snapshot and unregisters.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.write_snapshot()?;
        self.closed = true;
        Ok(())
    }
}

impl<V: CellValue> Drop for Grid<V> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.flush() {
                warn!("failed to flush {} on drop: {:#}", self.core.id, e);
            }
        }
        self.env.unregister(self.core.id);
    }
}
