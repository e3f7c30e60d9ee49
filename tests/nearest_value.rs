//! # Nearest-Value Integration Tests
//!
//! Searches through the grid façade, where distances are scaled by the
//! cell size and cells may live in evicted chunks.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use grids::{CellId, Dimensions, Environment, Grid};
use tempfile::tempdir;

fn env() -> Environment {
    Environment::builder()
        .memory_budget(16 * 1024 * 1024)
        .open()
        .unwrap()
}

fn dec(text: &str) -> BigDecimal {
    BigDecimal::from_str(text).unwrap()
}

fn grid_with_cellsize(env: &Environment, dir: &std::path::Path, cellsize: &str) -> Grid<i32> {
    let dims = Dimensions::from_origin(dec(cellsize), dec("0"), dec("0"), 5, 5).unwrap();
    Grid::<i32>::builder()
        .dir(dir)
        .shape(5, 5)
        .chunk_shape(2, 2)
        .dimensions(dims)
        .nodata(-1)
        .create(env)
        .unwrap()
}

#[test]
fn test_equidistant_corners_are_averaged() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "1");
    grid.set_cell(0, 0, 7).unwrap();
    grid.set_cell(4, 4, 9).unwrap();

    let nearest = grid.nearest_values(2, 2).unwrap().unwrap();
    assert_eq!(nearest.cells.len(), 2);
    assert!(nearest.cells.contains(&CellId::new(0, 0)));
    assert!(nearest.cells.contains(&CellId::new(4, 4)));
    assert!((nearest.distance - 8f64.sqrt()).abs() < 1e-9);
    assert_eq!(nearest.mean, 8.0);
    assert_eq!(grid.nearest_value(2, 2).unwrap(), Some(8.0));
}

#[test]
fn test_distance_scales_with_cellsize() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "2.5");
    grid.set_cell(2, 4, 3).unwrap();

    let nearest = grid.nearest_values(2, 1).unwrap().unwrap();
    assert_eq!(nearest.cells, vec![CellId::new(2, 4)]);
    assert!((nearest.distance - 7.5).abs() < 1e-9);
}

#[test]
fn test_start_cell_with_value_is_distance_zero() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "1");
    grid.set_cell(3, 1, 4).unwrap();
    grid.set_cell(3, 2, 8).unwrap();

    let nearest = grid.nearest_values(3, 1).unwrap().unwrap();
    assert_eq!(nearest.cells, vec![CellId::new(3, 1)]);
    assert_eq!(nearest.distance, 0.0);
    assert_eq!(nearest.mean, 4.0);
}

#[test]
fn test_point_search_prefers_euclidean_over_ring_order() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "2");
    grid.set_cell(1, 1, 1).unwrap();
    grid.set_cell(2, 4, 5).unwrap();

    // Cell units (row 2.5, col 2.95): (1, 1) is one ring away but 1.76
    // cells distant, (2, 4) is two rings away but only 1.55 cells distant.
    let nearest = grid
        .nearest_values_at(&dec("5.9"), &dec("5.0"))
        .unwrap()
        .unwrap();
    assert_eq!(nearest.cells, vec![CellId::new(2, 4)]);
    assert!((nearest.distance - 3.1).abs() < 1e-9);
    assert_eq!(nearest.mean, 5.0);
}

#[test]
fn test_point_outside_box_finds_nothing() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "1");
    grid.set_cell(0, 0, 1).unwrap();

    assert!(grid.nearest_values_at(&dec("-1"), &dec("2")).unwrap().is_none());
    assert!(grid.nearest_values(5, 0).unwrap().is_none());
}

#[test]
fn test_empty_grid_has_no_nearest_value() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "1");

    assert_eq!(grid.nearest_value(2, 2).unwrap(), None);
    assert_eq!(grid.resident_chunk_count(), 0, "the search reads, it never creates");
}

#[test]
fn test_search_reads_evicted_chunks() {
    let dir = tempdir().unwrap();
    let env = env();
    let grid = grid_with_cellsize(&env, dir.path(), "1");
    grid.set_cell(4, 0, 6).unwrap();
    grid.evict_all();
    assert_eq!(grid.resident_chunk_count(), 0);

    let nearest = grid.nearest_values(0, 0).unwrap().unwrap();
    assert_eq!(nearest.cells, vec![CellId::new(4, 0)]);
    assert!((nearest.distance - 4.0).abs() < 1e-9);
    assert_eq!(nearest.mean, 6.0);
}
