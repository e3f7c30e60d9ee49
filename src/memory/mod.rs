//! # Memory Budget Management
//!
//! This module provides the memory budget that makes low-memory behaviour
//! explicit. Rust aborts on allocator failure, so instead of catching an
//! out-of-memory condition the engine charges every allocation it makes on
//! behalf of a grid to a shared [`MemoryBudget`] and treats a refused charge
//! as the low-memory signal ([`AllocationPressure`]).
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |                  Total Memory Budget                      |
//! |  (default: 25% of system RAM, minimum floor: 4 MB)       |
//! +----------------------------------------------------------+
//! |  Chunks   resident chunk stores (one lease per chunk)     |
//! |  Io       encode/decode buffers during save and load      |
//! |  Cushion  safety margin, released first under pressure    |
//! +----------------------------------------------------------+
//! ```
//!
//! ## Enforcement Model
//!
//! Hard limits: a charge that would exceed the total is refused with an
//! [`AllocationPressure`] error. Grids react by asking the
//! [`Environment`](crate::environment::Environment) to evict chunks and retry.
//!
//! ## Configuration
//!
//! ```rust,ignore
//! // Auto-detect (25% of system RAM, 4MB floor)
//! let budget = MemoryBudget::auto_detect();
//!
//! // Explicit limit
//! let budget = MemoryBudget::with_limit(16 * 1024 * 1024);
//!
//! // Via environment builder
//! let env = Environment::builder()
//!     .memory_budget(16 * 1024 * 1024)
//!     .open()?;
//! ```

mod budget;
mod lease;

pub use budget::{is_allocation_pressure, AllocationPressure, BudgetStats, MemoryBudget, Pool};
pub use lease::{BudgetLease, IoBuffer};
