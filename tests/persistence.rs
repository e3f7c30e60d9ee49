//! # Persistence Integration Tests
//!
//! Grids survive close/open cycles with their values, geometry and
//! statistics; damaged files surface as storage errors; the resident-set
//! snapshot is used only when it matches the metadata.
//!
//! ## Test Coverage
//!
//! 1. Reopen
//!    - close() then open() restores values, shape and statistics
//!    - Dropping without close() still persists
//!    - Wrong value type and missing directory are rejected
//!
//! 2. Corruption
//!    - Damaged chunk files and grid.meta report `Corrupt`
//!
//! 3. Snapshot
//!    - Matching snapshot preloads the resident set
//!    - Stale snapshot is ignored

use std::fs;
use std::path::Path;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use grids::{
    storage_error, ChunkEncoding, ChunkId, Dimensions, Environment, Grid, StatsMode,
    StorageErrorKind,
};
use tempfile::tempdir;

fn env() -> Environment {
    Environment::builder()
        .memory_budget(16 * 1024 * 1024)
        .open()
        .unwrap()
}

fn populate(grid: &Grid<i32>) {
    for row in 0..grid.nrows() {
        for col in 0..grid.ncols() {
            if (row + col) % 3 == 0 {
                grid.set_cell(row, col, (row * 7 - col) as i32).unwrap();
            }
        }
    }
}

fn flip_last_byte(path: &Path) {
    let mut bytes = fs::read(path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

// ============================================================================
// Reopen
// ============================================================================

mod reopen_tests {
    use super::*;

    #[test]
    fn test_close_then_open_restores_everything() {
        let dir = tempdir().unwrap();
        let env = env();
        let dims = Dimensions::from_origin(
            BigDecimal::from_str("0.25").unwrap(),
            BigDecimal::from_str("-12.5").unwrap(),
            BigDecimal::from_str("40").unwrap(),
            20,
            18,
        )
        .unwrap();

        let grid = Grid::<i32>::builder()
            .dir(dir.path())
            .shape(20, 18)
            .chunk_shape(8, 8)
            .dimensions(dims.clone())
            .nodata(-9999)
            .encoding(ChunkEncoding::Sparse)
            .create(&env)
            .unwrap();
        populate(&grid);
        let stats = grid.stats().unwrap();
        grid.close().unwrap();

        let reopened = Grid::<i32>::open(&env, dir.path()).unwrap();
        assert_eq!(reopened.nrows(), 20);
        assert_eq!(reopened.ncols(), 18);
        assert_eq!(reopened.shape().chunk_nrows(), 8);
        assert_eq!(reopened.dimensions(), &dims);
        assert_eq!(reopened.nodata(), -9999);
        assert_eq!(reopened.default_encoding(), ChunkEncoding::Sparse);
        assert_eq!(reopened.stats().unwrap(), stats);

        for row in 0..20 {
            for col in 0..18 {
                let expected = if (row + col) % 3 == 0 {
                    (row * 7 - col) as i32
                } else {
                    -9999
                };
                assert_eq!(reopened.get_cell(row, col).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_drop_without_close_persists() {
        let dir = tempdir().unwrap();
        let env = env();
        {
            let grid = Grid::<f64>::builder()
                .dir(dir.path())
                .shape(10, 10)
                .stats_mode(StatsMode::Lazy)
                .create(&env)
                .unwrap();
            grid.set_cell(9, 0, 2.75).unwrap();
        }

        let grid = Grid::<f64>::open(&env, dir.path()).unwrap();
        assert_eq!(grid.get_cell(9, 0).unwrap(), 2.75);
        assert_eq!(grid.stats_mode(), StatsMode::Lazy);
        assert_eq!(grid.stats().unwrap().count, 1);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = tempdir().unwrap();
        let env = env();
        let grid = Grid::<i32>::builder()
            .dir(dir.path())
            .shape(4, 4)
            .create(&env)
            .unwrap();
        grid.set_cell(0, 0, 1).unwrap();
        grid.flush().unwrap();
        let meta = fs::read(dir.path().join("grid.meta")).unwrap();

        grid.flush().unwrap();
        assert_eq!(fs::read(dir.path().join("grid.meta")).unwrap(), meta);
    }

    #[test]
    fn test_open_rejects_wrong_value_type() {
        let dir = tempdir().unwrap();
        let env = env();
        Grid::<i32>::builder()
            .dir(dir.path())
            .shape(4, 4)
            .create(&env)
            .unwrap()
            .close()
            .unwrap();

        let err = Grid::<f64>::open(&env, dir.path()).unwrap_err();
        assert!(err.to_string().contains("value type"));
    }

    #[test]
    fn test_open_missing_grid() {
        let dir = tempdir().unwrap();
        let env = env();
        let err = Grid::<i32>::open(&env, dir.path().join("nothing")).unwrap_err();
        assert_eq!(storage_error(&err).unwrap().kind, StorageErrorKind::Missing);
    }
}

// ============================================================================
// Corruption
// ============================================================================

mod corruption_tests {
    use super::*;

    #[test]
    fn test_corrupt_chunk_file_is_reported() {
        let dir = tempdir().unwrap();
        let env = env();
        let grid = Grid::<i32>::builder()
            .dir(dir.path())
            .shape(8, 8)
            .chunk_shape(4, 4)
            .create(&env)
            .unwrap();
        grid.set_cell(1, 1, 11).unwrap();
        grid.set_cell(6, 6, 66).unwrap();
        assert_eq!(grid.evict_all().len(), 2);

        let path = dir.path().join("chunks").join("0_0.chunk");
        assert!(path.is_file());
        flip_last_byte(&path);

        let err = grid.get_cell(1, 1).unwrap_err();
        let storage = storage_error(&err).expect("storage error");
        assert_eq!(storage.kind, StorageErrorKind::Corrupt);
        assert_eq!(storage.path, path);

        assert_eq!(grid.get_cell(6, 6).unwrap(), 66, "other chunks stay readable");
        assert!(!grid.is_resident(ChunkId::new(0, 0)));
    }

    #[test]
    fn test_truncated_metadata_is_corrupt() {
        let dir = tempdir().unwrap();
        let env = env();
        Grid::<i32>::builder()
            .dir(dir.path())
            .shape(4, 4)
            .create(&env)
            .unwrap()
            .close()
            .unwrap();

        let meta = dir.path().join("grid.meta");
        let bytes = fs::read(&meta).unwrap();
        fs::write(&meta, &bytes[..10]).unwrap();

        let err = Grid::<i32>::open(&env, dir.path()).unwrap_err();
        assert_eq!(storage_error(&err).unwrap().kind, StorageErrorKind::Corrupt);
    }
}

// ============================================================================
// Snapshot
// ============================================================================

mod snapshot_tests {
    use super::*;

    fn three_chunk_grid(env: &Environment, dir: &Path) -> Grid<i32> {
        Grid::<i32>::builder()
            .dir(dir)
            .shape(4, 12)
            .chunk_shape(4, 4)
            .create(env)
            .unwrap()
    }

    #[test]
    fn test_matching_snapshot_preloads_resident_set() {
        let dir = tempdir().unwrap();
        let env = env();
        let grid = three_chunk_grid(&env, dir.path());
        grid.set_cell(0, 0, 1).unwrap();
        grid.set_cell(0, 9, 3).unwrap();
        grid.close().unwrap();
        assert!(dir.path().join("resident.cache").is_file());

        let grid = Grid::<i32>::open(&env, dir.path()).unwrap();
        assert_eq!(grid.resident_chunk_count(), 2);
        assert!(grid.is_resident(ChunkId::new(0, 0)));
        assert!(grid.is_resident(ChunkId::new(0, 2)));
        assert!(!grid.is_resident(ChunkId::new(0, 1)));
        assert_eq!(grid.get_cell(0, 9).unwrap(), 3);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let dir = tempdir().unwrap();
        let env = env();
        let grid = three_chunk_grid(&env, dir.path());
        grid.set_cell(0, 0, 1).unwrap();
        grid.close().unwrap();

        let grid = Grid::<i32>::open(&env, dir.path()).unwrap();
        grid.set_cell(0, 5, 2).unwrap();
        grid.flush().unwrap();
        drop(grid);

        let grid = Grid::<i32>::open(&env, dir.path()).unwrap();
        assert_eq!(grid.resident_chunk_count(), 0);
        assert_eq!(grid.get_cell(0, 0).unwrap(), 1);
        assert_eq!(grid.get_cell(0, 5).unwrap(), 2);
    }

    #[test]
    fn test_damaged_snapshot_is_ignored() {
        let dir = tempdir().unwrap();
        let env = env();
        let grid = three_chunk_grid(&env, dir.path());
        grid.set_cell(3, 3, 7).unwrap();
        grid.close().unwrap();
        flip_last_byte(&dir.path().join("resident.cache"));

        let grid = Grid::<i32>::open(&env, dir.path()).unwrap();
        assert_eq!(grid.resident_chunk_count(), 0);
        assert_eq!(grid.get_cell(3, 3).unwrap(), 7);
    }
}
