//! The resident set of one grid: `ChunkId -> Chunk`.
//!
//! The directory only tracks residency. It never loads, saves or evicts on its
//! own; the grid passes a loader to [`ChunkDirectory::get_or_load`] and the
//! environment drives eviction through the grid.

use eyre::Result;
use hashbrown::HashMap;

use super::{CellValue, ChunkId};
use crate::chunk::Chunk;

pub struct ChunkDirectory<V: CellValue> {
    chunks: HashMap<ChunkId, Chunk<V>>,
}

impl<V: CellValue> Default for ChunkDirectory<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CellValue> ChunkDirectory<V> {
    pub fn new() -> Self {
        Self {
            chunks: HashMap::new(),
        }
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk<V>> {
        self.chunks.get(&id)
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk<V>> {
        self.chunks.get_mut(&id)
    }

    /// Returns the resident chunk, running `loader` and inserting its result
    /// on a miss. Loader errors propagate unchanged and leave the directory
    /// untouched.
    pub fn get_or_load(
        &mut self,
        id: ChunkId,
        loader: impl FnOnce() -> Result<Chunk<V>>,
    ) -> Result<&mut Chunk<V>> {
        if !self.chunks.contains_key(&id) {
            let chunk = loader()?;
            self.chunks.insert(id, chunk);
        }
        self.chunks
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("chunk {} vanished after insert", id))
    }

    /// Inserts or replaces, returning the displaced chunk.
    pub fn put(&mut self, id: ChunkId, chunk: Chunk<V>) -> Option<Chunk<V>> {
        self.chunks.insert(id, chunk)
    }

    pub fn remove(&mut self, id: ChunkId) -> Option<Chunk<V>> {
        self.chunks.remove(&id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    /// Resident ids in unspecified order.
    pub fn ids(&self) -> Vec<ChunkId> {
        self.chunks.keys().copied().collect()
    }

    pub fn dirty_ids(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, chunk)| chunk.is_dirty())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk<V>> {
        self.chunks.values()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkEncoding;
    use crate::grid::GridId;
    use crate::memory::{is_allocation_pressure, MemoryBudget};
    use std::sync::Arc;

    fn fresh(id: ChunkId, budget: &Arc<MemoryBudget>) -> Result<Chunk<i32>> {
        Chunk::empty(GridId(1), id, 2, 2, ChunkEncoding::Array, i32::MIN, budget)
    }

    #[test]
    fn get_or_load_runs_loader_once() {
        let budget = Arc::new(MemoryBudget::with_limit(1 << 20));
        let mut dir = ChunkDirectory::new();
        let id = ChunkId::new(0, 1);
        let mut calls = 0;

        for _ in 0..3 {
            dir.get_or_load(id, || {
                calls += 1;
                fresh(id, &budget)
            })
            .unwrap();
        }
        assert_eq!(calls, 1);
        assert!(dir.contains(id));
        assert_eq!(dir.dirty_ids(), vec![id]);
    }

    #[test]
    fn loader_failure_leaves_directory_unchanged() {
        let budget = Arc::new(MemoryBudget::with_limit(0));
        let mut dir = ChunkDirectory::new();
        let id = ChunkId::new(0, 0);

        let err = dir.get_or_load(id, || fresh(id, &budget)).unwrap_err();
        assert!(is_allocation_pressure(&err));
        assert!(dir.is_empty());
    }

    #[test]
    fn put_returns_displaced_chunk() {
        let budget = Arc::new(MemoryBudget::with_limit(1 << 20));
        let mut dir = ChunkDirectory::new();
        let id = ChunkId::new(0, 0);

        assert!(dir.put(id, fresh(id, &budget).unwrap()).is_none());
        assert!(dir.put(id, fresh(id, &budget).unwrap()).is_some());
        assert_eq!(dir.len(), 1);
        assert!(dir.remove(id).is_some());
        assert!(!dir.contains(id));
    }
}
