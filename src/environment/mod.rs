//! # Environment
//!
//! The process-wide coordinator shared by every grid: it owns the
//! [`MemoryBudget`], keeps the cushion reserved, and evicts chunks across
//! grids when an allocation is refused.
//!
//! ## Registration
//!
//! Grids register an [`Evictable`] capability when they are created and
//! unregister when dropped. The registry holds weak references only, so the
//! environment never keeps a grid alive. A grid that was dropped without
//! unregistering is pruned the next time the registry is walked.
//!
//! ## Eviction Policy
//!
//! Candidates are taken in the order a grid enumerates its resident chunks;
//! there is no recency or frequency tracking. A candidate is persisted before
//! it is dropped. If persisting fails the chunk stays resident, the failure is
//! logged by the grid, and the search moves on to the next candidate. A chunk
//! named in the protected set of a call is never evicted by that call.
//!
//! ## Lock Order
//!
//! ```text
//! Grid::run              Environment                 Evictable (grid)
//! ---------              -----------                 ----------------
//! lock state, run core
//! unlock
//! relieve_pressure() --> lock registry, upgrade
//!                        unlock
//!                        swap_chunk() ------------>  lock state, persist,
//!                                                    remove, unlock
//! ```
//!
//! Neither side holds its own lock while calling the other.
//!
//! ## Cushion
//!
//! A lease of `cushion_bytes` in the `Cushion` pool. Under pressure it is
//! released first, so the eviction path has room for its I/O buffers even
//! when chunks fill the rest of the budget, and re-reserved once enough
//! chunks have been evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eyre::Result;
use hashbrown::HashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::DEFAULT_CUSHION_BYTES;
use crate::grid::{ChunkId, GridId};
use crate::memory::{BudgetLease, BudgetStats, MemoryBudget, Pool};

/// Chunks a caller forbids the environment from evicting.
pub type ProtectedSet = HashSet<(GridId, ChunkId)>;

/// What the environment needs from a grid to evict its chunks.
pub trait Evictable: Send + Sync {
    fn grid_id(&self) -> GridId;

    /// Resident chunk ids in directory enumeration order.
    fn resident_chunk_ids(&self) -> Vec<ChunkId>;

    fn resident_len(&self) -> usize;

    /// Persists the chunk if dirty and drops it from residency. Returns
    /// `false` when the chunk stayed resident.
    fn swap_chunk(&self, id: ChunkId) -> bool;

    /// Persists the chunk if dirty without evicting it. Returns `false` when
    /// the write failed.
    fn persist_chunk(&self, id: ChunkId) -> bool;
}

/// The chunks evicted by one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    evicted: SmallVec<[(GridId, ChunkId); 4]>,
}

impl EvictionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, grid: GridId, chunk: ChunkId) {
        self.evicted.push((grid, chunk));
    }

    pub fn merge(&mut self, other: EvictionReport) {
        self.evicted.extend(other.evicted);
    }

    pub fn len(&self) -> usize {
        self.evicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }

    pub fn contains(&self, grid: GridId, chunk: ChunkId) -> bool {
        self.evicted.contains(&(grid, chunk))
    }

    /// Number of evicted chunks that belonged to `grid`.
    pub fn count_for(&self, grid: GridId) -> usize {
        self.evicted.iter().filter(|(g, _)| *g == grid).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(GridId, ChunkId)> {
        self.evicted.iter()
    }
}

/// Outcome of a persistence sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Chunks that are clean on disk after the sweep.
    pub persisted: usize,
    /// Chunks whose write failed and which are still dirty.
    pub failed: usize,
}

impl PersistSummary {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

struct Registry {
    grids: Vec<(GridId, Weak<dyn Evictable>)>,
}

struct EnvironmentInner {
    budget: Arc<MemoryBudget>,
    cushion_bytes: usize,
    cushion: Mutex<Option<BudgetLease>>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

/// Cloneable handle to the shared environment.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("budget", &self.inner.budget.stats())
            .field("cushion_bytes", &self.inner.cushion_bytes)
            .field("has_cushion", &self.has_cushion())
            .field("grids", &self.registered_grids())
            .finish()
    }
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    /// An environment with an auto-detected budget and the default cushion.
    pub fn new() -> Result<Self> {
        EnvironmentBuilder::new().open()
    }

    fn from_parts(budget: Arc<MemoryBudget>, cushion_bytes: usize) -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                budget,
                cushion_bytes,
                cushion: Mutex::new(None),
                registry: Mutex::new(Registry { grids: Vec::new() }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.inner.budget
    }

    pub fn memory_stats(&self) -> BudgetStats {
        self.inner.budget.stats()
    }

    pub fn cushion_bytes(&self) -> usize {
        self.inner.cushion_bytes
    }

    /// Hands out the id a new grid registers under.
    pub fn allocate_grid_id(&self) -> GridId {
        GridId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, id: GridId, grid: Weak<dyn Evictable>) {
        let mut registry = self.inner.registry.lock();
        registry.grids.retain(|(g, w)| *g != id && w.strong_count() > 0);
        registry.grids.push((id, grid));
        debug!("registered {}", id);
    }

    pub fn unregister(&self, id: GridId) {
        let mut registry = self.inner.registry.lock();
        registry.grids.retain(|(g, w)| *g != id && w.strong_count() > 0);
        debug!("unregistered {}", id);
    }

    pub fn registered_grids(&self) -> usize {
        self.inner
            .registry
            .lock()
            .grids
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    /// Live grids in registration order. The registry lock is released before
    /// this returns, so callers may call into the grids freely.
    fn live_grids(&self) -> Vec<Arc<dyn Evictable>> {
        let registry = self.inner.registry.lock();
        registry.grids.iter().filter_map(|(_, w)| w.upgrade()).collect()
    }

    fn find(&self, id: GridId) -> Option<Arc<dyn Evictable>> {
        let registry = self.inner.registry.lock();
        registry
            .grids
            .iter()
            .find(|(g, _)| *g == id)
            .and_then(|(_, w)| w.upgrade())
    }

    /// `grid` first, then every other live grid in registration order.
    fn grids_starting_with(&self, grid: GridId) -> Vec<Arc<dyn Evictable>> {
        let mut grids = self.live_grids();
        if let Some(pos) = grids.iter().position(|g| g.grid_id() == grid) {
            let first = grids.remove(pos);
            grids.insert(0, first);
        }
        grids
    }

    /// Evicts up to `limit` unprotected chunks of one grid.
    fn evict_from(
        grid: &dyn Evictable,
        protected: &ProtectedSet,
        limit: usize,
        report: &mut EvictionReport,
    ) -> usize {
        let gid = grid.grid_id();
        let mut evicted = 0;
        for id in grid.resident_chunk_ids() {
            if evicted == limit {
                break;
            }
            if protected.contains(&(gid, id)) {
                continue;
            }
            if grid.swap_chunk(id) {
                report.push(gid, id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Evicts the first evictable resident chunk of `grid`.
    pub fn evict_one(&self, grid: GridId) -> EvictionReport {
        self.evict_one_except(grid, &ProtectedSet::new())
    }

    /// Evicts one unprotected chunk, preferring `grid` and falling back to the
    /// other registered grids.
    pub fn evict_one_except(&self, grid: GridId, protected: &ProtectedSet) -> EvictionReport {
        let mut report = EvictionReport::new();
        for candidate in self.grids_starting_with(grid) {
            if Self::evict_from(candidate.as_ref(), protected, 1, &mut report) > 0 {
                break;
            }
        }
        report
    }

    /// Evicts every unprotected resident chunk of `grid`.
    pub fn evict_all_except(&self, grid: GridId, protected: &ProtectedSet) -> EvictionReport {
        let mut report = EvictionReport::new();
        if let Some(target) = self.find(grid) {
            Self::evict_from(target.as_ref(), protected, usize::MAX, &mut report);
        }
        report
    }

    pub fn evict_all(&self, grid: GridId) -> EvictionReport {
        self.evict_all_except(grid, &ProtectedSet::new())
    }

    /// Evicts one unprotected chunk from whichever grid yields one first.
    pub fn evict_any(&self, protected: &ProtectedSet) -> EvictionReport {
        self.evict_until(1, protected)
    }

    /// Evicts across grids until `n` chunks are gone or nothing more can be.
    pub fn evict_until(&self, n: usize, protected: &ProtectedSet) -> EvictionReport {
        let mut report = EvictionReport::new();
        for grid in self.live_grids() {
            let remaining = n - report.len();
            if remaining == 0 {
                break;
            }
            Self::evict_from(grid.as_ref(), protected, remaining, &mut report);
        }
        report
    }

    pub fn evict_everything(&self) -> EvictionReport {
        let mut report = EvictionReport::new();
        let protected = ProtectedSet::new();
        for grid in self.live_grids() {
            Self::evict_from(grid.as_ref(), &protected, usize::MAX, &mut report);
        }
        debug!("evicted all {} resident chunks", report.len());
        report
    }

    fn persist_grid(grid: &dyn Evictable, summary: &mut PersistSummary) {
        for id in grid.resident_chunk_ids() {
            if grid.persist_chunk(id) {
                summary.persisted += 1;
            } else {
                summary.failed += 1;
            }
        }
    }

    /// Writes every dirty resident chunk of `grid` without evicting.
    pub fn persist_all(&self, grid: GridId) -> PersistSummary {
        let mut summary = PersistSummary::default();
        if let Some(target) = self.find(grid) {
            Self::persist_grid(target.as_ref(), &mut summary);
        }
        summary
    }

    pub fn persist_everything(&self) -> PersistSummary {
        let mut summary = PersistSummary::default();
        for grid in self.live_grids() {
            Self::persist_grid(grid.as_ref(), &mut summary);
        }
        summary
    }

    /// Total resident chunks across all live grids.
    pub fn resident_chunks(&self) -> usize {
        self.live_grids().iter().map(|g| g.resident_len()).sum()
    }

    /// Reserves the cushion if it is not held. Returns whether it is held
    /// afterwards.
    pub fn reserve_cushion(&self) -> bool {
        let mut cushion = self.inner.cushion.lock();
        if cushion.is_some() {
            return true;
        }
        match BudgetLease::acquire(&self.inner.budget, Pool::Cushion, self.inner.cushion_bytes) {
            Ok(lease) => {
                *cushion = Some(lease);
                true
            }
            Err(_) => false,
        }
    }

    pub fn release_cushion(&self) {
        self.inner.cushion.lock().take();
    }

    pub fn has_cushion(&self) -> bool {
        self.inner.cushion.lock().is_some()
    }

    /// One pressure-relief step of the grid retry protocol.
    ///
    /// Releases the cushion, evicts one unprotected chunk (from `grid` first,
    /// then from the others) and keeps evicting until the cushion fits again.
    /// An empty report means nothing could be freed.
    pub fn relieve_pressure(&self, grid: GridId, protected: &ProtectedSet) -> EvictionReport {
        self.release_cushion();

        let mut report = self.evict_one_except(grid, protected);
        if report.is_empty() {
            if !self.reserve_cushion() {
                warn!(
                    "nothing evictable for {} and the cushion could not be re-reserved ({})",
                    grid,
                    self.memory_stats()
                );
            }
            return report;
        }

        while !self.reserve_cushion() {
            let more = self.evict_one_except(grid, protected);
            if more.is_empty() {
                warn!(
                    "cushion could not be re-reserved after evicting {} chunks ({})",
                    report.len(),
                    self.memory_stats()
                );
                break;
            }
            report.merge(more);
        }

        debug!(
            "relieved pressure for {}: evicted {} chunks ({})",
            grid,
            report.len(),
            self.memory_stats()
        );
        report
    }
}

/// Builder for [`Environment`].
///
/// | Option        | Default              |
/// |---------------|----------------------|
/// | memory_budget | 25% of RAM (4MB+)    |
/// | cushion_bytes | 64 KiB               |
pub struct EnvironmentBuilder {
    memory_budget: Option<usize>,
    cushion_bytes: usize,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self {
            memory_budget: None,
            cushion_bytes: DEFAULT_CUSHION_BYTES,
        }
    }

    /// Total bytes shared by every grid of the environment, cushion included.
    pub fn memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn cushion_bytes(mut self, bytes: usize) -> Self {
        self.cushion_bytes = bytes;
        self
    }

    pub fn open(self) -> Result<Environment> {
        let budget = match self.memory_budget {
            Some(bytes) => MemoryBudget::with_limit(bytes),
            None => MemoryBudget::auto_detect(),
        };
        eyre::ensure!(
            self.cushion_bytes <= budget.total_limit(),
            "cushion of {} bytes does not fit a budget of {} bytes",
            self.cushion_bytes,
            budget.total_limit()
        );

        let env = Environment::from_parts(Arc::new(budget), self.cushion_bytes);
        env.reserve_cushion();
        debug!("opened environment ({})", env.memory_stats());
        Ok(env)
    }
}
