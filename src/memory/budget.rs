//! # Memory Budget Implementation
//!
//! This module implements the byte budget that stands in for the allocator's
//! out-of-memory condition. Everything the engine keeps in memory on behalf of
//! a grid is charged here first; a refused charge is an
//! [`AllocationPressure`] and is what the retry protocol reacts to.
//!
//! ## Design Principles
//!
//! 1. **Hard Limits**: Allocations that would exceed the budget fail immediately
//! 2. **Per-Pool Accounting**: Usage is tracked separately per [`Pool`] so
//!    stats show where memory went
//! 3. **Thread Safety**: All counters use atomics for lock-free operation
//!
//! ## Pools
//!
//! | Pool    | Charged by                                             |
//! |---------|--------------------------------------------------------|
//! | Chunks  | Resident chunk value stores and sparse entry growth    |
//! | Io      | Encode/decode buffers used while saving/loading chunks |
//! | Cushion | The environment's pre-reserved safety margin           |
//!
//! All pools draw from the same total. The cushion is a normal allocation in
//! its own pool; releasing it is what gives the eviction path room to lease
//! its I/O buffers while chunks still fill the rest of the budget.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use eyre::Result;
use sysinfo::System;

pub use crate::config::{DEFAULT_BUDGET_PERCENT, MIN_BUDGET_FLOOR};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Chunks = 0,
    Io = 1,
    Cushion = 2,
}

impl Pool {
    pub fn name(&self) -> &'static str {
        match self {
            Pool::Chunks => "chunks",
            Pool::Io => "io",
            Pool::Cushion => "cushion",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetStats {
    pub total_limit: usize,
    pub total_used: usize,
    pub chunks_used: usize,
    pub io_used: usize,
    pub cushion_used: usize,
}

impl BudgetStats {
    pub fn available(&self) -> usize {
        self.total_limit.saturating_sub(self.total_used)
    }

    pub fn utilization_percent(&self) -> f64 {
        if self.total_limit == 0 {
            return 0.0;
        }
        (self.total_used as f64 / self.total_limit as f64) * 100.0
    }
}

impl std::fmt::Display for BudgetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunks:{},io:{},cushion:{},total:{}/{}",
            self.chunks_used, self.io_used, self.cushion_used, self.total_used, self.total_limit
        )
    }
}

/// The budget refused an allocation.
///
/// This is the recoverable low-memory condition: the grid retry loop reacts
/// to it by evicting chunks and trying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPressure {
    pub pool: Pool,
    pub requested: usize,
    pub available: usize,
}

impl std::fmt::Display for AllocationPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory budget exceeded: {} pool requested {} bytes but only {} available",
            self.pool.name(),
            self.requested,
            self.available
        )
    }
}

impl std::error::Error for AllocationPressure {}

/// Returns true when `err`, or anything it wraps, is an [`AllocationPressure`].
pub fn is_allocation_pressure(err: &eyre::Report) -> bool {
    err.chain().any(|cause| cause.is::<AllocationPressure>())
}

/// Shared byte budget. The total is reserved with a single atomic update, so
/// concurrent charges from different pools can never overshoot the limit
/// together; the per-pool counters only record where the bytes went.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: AtomicUsize,
    used: AtomicUsize,
    pools: [AtomicUsize; 3],
}

impl MemoryBudget {
    pub fn auto_detect() -> Self {
        let system = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.total_memory() as usize
        });
        Self::with_limit(((system / 100) * DEFAULT_BUDGET_PERCENT).max(MIN_BUDGET_FLOOR))
    }

    /// A budget of exactly `limit` bytes. Small limits are allowed so tests and
    /// embedded callers can constrain the resident set to a handful of chunks.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
            pools: Default::default(),
        }
    }

    pub fn unlimited() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn total_limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Changes the limit. Lowering it below current usage refuses every
    /// charge until enough is released.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Release);
    }

    pub fn total_used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.total_limit().saturating_sub(self.total_used())
    }

    pub fn pool_used(&self, pool: Pool) -> usize {
        self.pool_counter(pool).load(Ordering::Acquire)
    }

    fn pool_counter(&self, pool: Pool) -> &AtomicUsize {
        &self.pools[pool as usize]
    }

    pub fn can_allocate(&self, bytes: usize) -> bool {
        self.available() >= bytes
    }

    /// Charges `bytes` to `pool`, or fails with [`AllocationPressure`]
    /// leaving every counter untouched.
    pub fn allocate(&self, pool: Pool, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }

        let limit = self.total_limit();
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map_err(|used| {
                eyre::Report::new(AllocationPressure {
                    pool,
                    requested: bytes,
                    available: limit.saturating_sub(used),
                })
            })?;
        self.pool_counter(pool).fetch_add(bytes, Ordering::AcqRel);
        Ok(())
    }

    /// Returns `bytes` from `pool`. Releasing more than the pool holds
    /// releases only what it holds.
    pub fn release(&self, pool: Pool, bytes: usize) {
        if bytes == 0 {
            return;
        }

        let held = self
            .pool_counter(pool)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                Some(held.saturating_sub(bytes))
            })
            .unwrap_or_else(|held| held);
        let released = held.min(bytes);
        self.used.fetch_sub(released, Ordering::AcqRel);
    }

    pub fn try_allocate(&self, pool: Pool, bytes: usize) -> bool {
        self.allocate(pool, bytes).is_ok()
    }

    pub fn stats(&self) -> BudgetStats {
        BudgetStats {
            total_limit: self.total_limit(),
            total_used: self.total_used(),
            chunks_used: self.pool_used(Pool::Chunks),
            io_used: self.pool_used(Pool::Io),
            cushion_used: self.pool_used(Pool::Cushion),
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::auto_detect()
    }
}
