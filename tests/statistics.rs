//! # Statistics Integration Tests
//!
//! Checks that incrementally maintained statistics always agree with a full
//! scan, across overwrites, no-data writes, extreme removal and eviction.

use grids::{Environment, Grid, StatsMode, StatsSummary};
use tempfile::tempdir;

fn env() -> Environment {
    Environment::builder()
        .memory_budget(16 * 1024 * 1024)
        .open()
        .unwrap()
}

/// Statistics computed by reading every cell through the public API.
fn scanned(grid: &Grid<i32>) -> StatsSummary<i32> {
    let nodata = grid.nodata();
    let mut values = Vec::new();
    grid.for_each_cell(|_, value| {
        if value != nodata {
            values.push(value);
        }
    })
    .unwrap();

    let min = values.iter().copied().min();
    let max = values.iter().copied().max();
    StatsSummary {
        count: values.len() as u64,
        sum: values.iter().map(|v| *v as i64).sum(),
        min,
        max,
        min_count: values.iter().filter(|v| Some(**v) == min).count() as u64,
        max_count: values.iter().filter(|v| Some(**v) == max).count() as u64,
    }
}

#[test]
fn test_empty_grid_has_no_statistics() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<f64>::builder()
        .dir(dir.path())
        .shape(5, 5)
        .create(&env)
        .unwrap();

    let stats = grid.stats().unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.min, None);
    assert_eq!(stats.mean(), None);
}

#[test]
fn test_incremental_matches_full_scan() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<i32>::builder()
        .dir(dir.path())
        .shape(12, 12)
        .chunk_shape(5, 5)
        .nodata(-1)
        .create(&env)
        .unwrap();

    for row in 0..12 {
        for col in 0..12 {
            grid.set_cell(row, col, ((row * 31 + col * 17) % 23) as i32).unwrap();
        }
    }
    assert_eq!(grid.stats().unwrap(), scanned(&grid));

    // Overwrites, no-data writes and repeated values.
    grid.set_cell(0, 0, 100).unwrap();
    grid.set_cell(1, 1, -1).unwrap();
    grid.set_cell(2, 2, 100).unwrap();
    grid.set_cell(3, 3, 100).unwrap();
    grid.set_cell(3, 3, 5).unwrap();
    assert_eq!(grid.stats().unwrap(), scanned(&grid));

    assert_eq!(grid.evict_all().len(), 9);
    assert_eq!(grid.stats().unwrap(), scanned(&grid));
}

#[test]
fn test_removing_every_extreme_triggers_rescan() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<i32>::builder()
        .dir(dir.path())
        .shape(4, 4)
        .nodata(0)
        .create(&env)
        .unwrap();

    grid.set_cell(0, 0, 1).unwrap();
    grid.set_cell(0, 1, 1).unwrap();
    grid.set_cell(0, 2, 5).unwrap();
    grid.set_cell(0, 3, 9).unwrap();

    grid.set_cell(0, 0, 4).unwrap();
    let stats = grid.stats().unwrap();
    assert_eq!(stats.min, Some(1));
    assert_eq!(stats.min_count, 1);

    grid.set_cell(0, 1, 0).unwrap();
    grid.set_cell(0, 3, 2).unwrap();
    let stats = grid.stats().unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.sum, 11);
    assert_eq!(stats.min, Some(2));
    assert_eq!(stats.max, Some(5));
    assert_eq!(stats, scanned(&grid));
}

#[test]
fn test_lazy_mode_rescans_on_demand() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<i32>::builder()
        .dir(dir.path())
        .shape(6, 6)
        .chunk_shape(3, 3)
        .nodata(-1)
        .stats_mode(StatsMode::Lazy)
        .create(&env)
        .unwrap();

    grid.set_cell(0, 0, 3).unwrap();
    grid.set_cell(5, 5, 7).unwrap();
    let stats = grid.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.sum, 10);
    assert_eq!(stats.mean(), Some(5.0));

    grid.set_cell(5, 5, -1).unwrap();
    assert_eq!(grid.stats().unwrap(), scanned(&grid));
}

#[test]
fn test_switching_modes_keeps_results_consistent() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<i32>::builder()
        .dir(dir.path())
        .shape(4, 4)
        .nodata(-1)
        .create(&env)
        .unwrap();
    grid.set_cell(1, 1, 4).unwrap();

    grid.set_stats_mode(StatsMode::Lazy);
    grid.set_cell(2, 2, 6).unwrap();
    grid.set_stats_mode(StatsMode::Incremental);
    assert_eq!(grid.stats_mode(), StatsMode::Incremental);
    assert_eq!(grid.stats().unwrap(), scanned(&grid));

    grid.set_cell(3, 3, 8).unwrap();
    assert_eq!(grid.stats().unwrap().count, 3);
    assert_eq!(grid.stats().unwrap(), scanned(&grid));
}

#[test]
fn test_integer_sum_does_not_overflow() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<i32>::builder()
        .dir(dir.path())
        .shape(2, 2)
        .create(&env)
        .unwrap();

    for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        grid.set_cell(row, col, i32::MAX).unwrap();
    }
    assert_eq!(grid.stats().unwrap().sum, 4 * i32::MAX as i64);
}

#[test]
fn test_float_statistics() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = Grid::<f64>::builder()
        .dir(dir.path())
        .shape(3, 3)
        .create(&env)
        .unwrap();
    grid.set_cell(0, 0, 1.5).unwrap();
    grid.set_cell(1, 1, -2.5).unwrap();
    grid.set_cell(2, 2, 4.0).unwrap();

    let stats = grid.stats().unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.sum, 3.0);
    assert_eq!(stats.min, Some(-2.5));
    assert_eq!(stats.max, Some(4.0));
    assert_eq!(stats.mean(), Some(1.0));
}
