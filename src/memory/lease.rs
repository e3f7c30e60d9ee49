//! # Budget Leases
//!
//! RAII handles over bytes charged to a [`MemoryBudget`].
//!
//! ## Purpose
//!
//! Every resident chunk holds a [`BudgetLease`] sized to its heap footprint.
//! When the chunk is evicted and dropped the lease returns its bytes to the
//! budget, so the accounting can never drift from the resident set. Chunks
//! whose footprint changes (sparse stores gaining entries, bit-packed stores
//! widening to arrays) resize their lease before growing; a refused resize is
//! the allocation failure the retry protocol handles.
//!
//! [`IoBuffer`] is the same idea for the scratch buffers used while encoding
//! or decoding a chunk file: the bytes are charged to the `Io` pool for as
//! long as the buffer lives.
//!
//! ## Usage
//!
//! ```ignore
//! let budget = Arc::new(MemoryBudget::with_limit(1 << 20));
//!
//! let mut lease = BudgetLease::acquire(&budget, Pool::Chunks, 4096)?;
//! lease.resize(8192)?;  // may fail with AllocationPressure
//!
//! // Bytes return to the budget when the lease drops
//! drop(lease);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use eyre::Result;

use super::budget::{MemoryBudget, Pool};

/// Bytes charged to one pool of a budget, released on drop.
pub struct BudgetLease {
    budget: Arc<MemoryBudget>,
    pool: Pool,
    bytes: usize,
}

impl std::fmt::Debug for BudgetLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetLease")
            .field("pool", &self.pool)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl BudgetLease {
    pub fn acquire(budget: &Arc<MemoryBudget>, pool: Pool, bytes: usize) -> Result<Self> {
        budget.allocate(pool, bytes)?;
        Ok(Self {
            budget: Arc::clone(budget),
            pool,
            bytes,
        })
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    /// Grows or shrinks the lease to `new_bytes`. Growth is charged before it
    /// is recorded, so a failure leaves the lease unchanged.
    pub fn resize(&mut self, new_bytes: usize) -> Result<()> {
        if new_bytes > self.bytes {
            self.budget.allocate(self.pool, new_bytes - self.bytes)?;
        } else {
            self.budget.release(self.pool, self.bytes - new_bytes);
        }
        self.bytes = new_bytes;
        Ok(())
    }

    pub fn grow(&mut self, extra: usize) -> Result<()> {
        self.resize(self.bytes + extra)
    }
}

impl Drop for BudgetLease {
    fn drop(&mut self) {
        self.budget.release(self.pool, self.bytes);
    }
}

/// A byte buffer whose capacity is charged to the `Io` pool.
pub struct IoBuffer {
    data: Vec<u8>,
    _lease: BudgetLease,
}

impl IoBuffer {
    /// Leases `capacity` bytes and returns an empty buffer able to hold them.
    pub fn with_capacity(budget: &Arc<MemoryBudget>, capacity: usize) -> Result<Self> {
        let lease = BudgetLease::acquire(budget, Pool::Io, capacity)?;
        Ok(Self {
            data: Vec::with_capacity(capacity),
            _lease: lease,
        })
    }

    /// Leases `len` bytes and returns a zero-filled buffer of that length.
    pub fn zeroed(budget: &Arc<MemoryBudget>, len: usize) -> Result<Self> {
        let mut buffer = Self::with_capacity(budget, len)?;
        buffer.data.resize(len, 0);
        Ok(buffer)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for IoBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for IoBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_returns_bytes_on_drop() {
        let budget = Arc::new(MemoryBudget::with_limit(1000));
        let lease = BudgetLease::acquire(&budget, Pool::Chunks, 400).unwrap();
        assert_eq!(budget.pool_used(Pool::Chunks), 400);

        drop(lease);
        assert_eq!(budget.pool_used(Pool::Chunks), 0);
    }

    #[test]
    fn test_lease_acquire_refused() {
        let budget = Arc::new(MemoryBudget::with_limit(100));
        assert!(BudgetLease::acquire(&budget, Pool::Chunks, 101).is_err());
        assert_eq!(budget.total_used(), 0);
    }

    #[test]
    fn test_lease_resize_up_and_down() {
        let budget = Arc::new(MemoryBudget::with_limit(1000));
        let mut lease = BudgetLease::acquire(&budget, Pool::Chunks, 100).unwrap();

        lease.resize(600).unwrap();
        assert_eq!(budget.pool_used(Pool::Chunks), 600);

        lease.resize(50).unwrap();
        assert_eq!(budget.pool_used(Pool::Chunks), 50);
        assert_eq!(lease.bytes(), 50);
    }

    #[test]
    fn test_failed_grow_leaves_lease_unchanged() {
        let budget = Arc::new(MemoryBudget::with_limit(200));
        let mut lease = BudgetLease::acquire(&budget, Pool::Chunks, 150).unwrap();

        assert!(lease.grow(100).is_err());
        assert_eq!(lease.bytes(), 150);
        assert_eq!(budget.pool_used(Pool::Chunks), 150);
    }

    #[test]
    fn test_io_buffer_charges_io_pool() {
        let budget = Arc::new(MemoryBudget::with_limit(1000));
        let mut buffer = IoBuffer::with_capacity(&budget, 256).unwrap();
        buffer.extend_from_slice(&[1, 2, 3]);

        assert_eq!(budget.pool_used(Pool::Io), 256);
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);

        drop(buffer);
        assert_eq!(budget.pool_used(Pool::Io), 0);
    }

    #[test]
    fn test_io_buffer_zeroed_len() {
        let budget = Arc::new(MemoryBudget::unlimited());
        let buffer = IoBuffer::zeroed(&budget, 64).unwrap();
        assert_eq!(buffer.len(), 64);
        assert!(buffer.iter().all(|&b| b == 0));
    }
}
