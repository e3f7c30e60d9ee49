//! # ESRI ASCII Grid Integration Tests
//!
//! Import places the first body line at the top (highest-y) row; export
//! writes the same orientation back out.

use std::fs;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use grids::io::{export, import, read_header};
use grids::{ChunkEncoding, Environment, Grid};
use tempfile::tempdir;

const SAMPLE: &str = "\
ncols         4
nrows         3
xllcorner     1000.0
yllcorner     2000.0
cellsize      25.0
NODATA_value  -9999
1 2 3 4
5 6 -9999 8
9 10 11 12
";

fn env() -> Environment {
    Environment::builder()
        .memory_budget(16 * 1024 * 1024)
        .open()
        .unwrap()
}

fn dec(text: &str) -> BigDecimal {
    BigDecimal::from_str(text).unwrap()
}

#[test]
fn test_import_orients_first_line_at_top_row() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("sample.asc");
    fs::write(&source, SAMPLE).unwrap();
    let env = env();

    let grid = import(&env, &source, Grid::<i32>::builder().dir(dir.path().join("grid"))).unwrap();
    assert_eq!((grid.nrows(), grid.ncols()), (3, 4));
    assert_eq!(grid.nodata(), -9999);

    assert_eq!(grid.get_cell(2, 0).unwrap(), 1);
    assert_eq!(grid.get_cell(2, 3).unwrap(), 4);
    assert_eq!(grid.get_cell(1, 2).unwrap(), -9999);
    assert_eq!(grid.get_cell(0, 0).unwrap(), 9);
    assert_eq!(grid.get_cell(0, 3).unwrap(), 12);

    let dims = grid.dimensions();
    assert_eq!(dims.xmax(), &dec("1100"));
    assert_eq!(dims.ymax(), &dec("2075"));
    assert_eq!(grid.get_value_at(&dec("1010"), &dec("2070")).unwrap(), 1);
    assert_eq!(grid.get_value_at(&dec("1099"), &dec("2001")).unwrap(), 12);

    let stats = grid.stats().unwrap();
    assert_eq!(stats.count, 11);
    assert_eq!(stats.sum, 71);
}

#[test]
fn test_import_is_persisted() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("sample.asc");
    fs::write(&source, SAMPLE).unwrap();
    let env = env();

    let grid_dir = dir.path().join("grid");
    drop(import(&env, &source, Grid::<f64>::builder().dir(&grid_dir).chunk_shape(2, 2)).unwrap());

    let grid = Grid::<f64>::open(&env, &grid_dir).unwrap();
    assert_eq!(grid.get_cell(1, 3).unwrap(), 8.0);
    assert_eq!(grid.nodata(), -9999.0);
}

#[test]
fn test_values_may_wrap_across_lines() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("wrapped.asc");
    fs::write(
        &source,
        "ncols 3\nnrows 2\nxllcenter 0.5\nyllcenter 0.5\ncellsize 1\n1 2\n3 4 5\n6\n",
    )
    .unwrap();
    let env = env();

    let grid = import(
        &env,
        &source,
        Grid::<i32>::builder()
            .dir(dir.path().join("grid"))
            .encoding(ChunkEncoding::Sparse)
            .nodata(0),
    )
    .unwrap();
    assert_eq!(grid.nodata(), 0, "no NODATA_value line keeps the builder's");
    assert_eq!(grid.dimensions().xmin(), &dec("0"));
    assert_eq!(grid.get_cell(1, 0).unwrap(), 1);
    assert_eq!(grid.get_cell(1, 2).unwrap(), 3);
    assert_eq!(grid.get_cell(0, 0).unwrap(), 4);
    assert_eq!(grid.get_cell(0, 2).unwrap(), 6);
}

#[test]
fn test_wrong_value_count_is_rejected() {
    let dir = tempdir().unwrap();
    let env = env();

    let short = dir.path().join("short.asc");
    fs::write(&short, "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n").unwrap();
    let err = import(&env, &short, Grid::<i32>::builder().dir(dir.path().join("a"))).unwrap_err();
    assert!(err.to_string().contains("expected 4"));

    let long = dir.path().join("long.asc");
    fs::write(&long, "ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2\n").unwrap();
    assert!(import(&env, &long, Grid::<i32>::builder().dir(dir.path().join("b"))).is_err());
}

#[test]
fn test_export_round_trips() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("sample.asc");
    fs::write(&source, SAMPLE).unwrap();
    let env = env();
    let grid = import(&env, &source, Grid::<i32>::builder().dir(dir.path().join("grid"))).unwrap();

    let exported = dir.path().join("exported.asc");
    export(&grid, &exported).unwrap();

    let header = read_header(&exported).unwrap();
    assert_eq!((header.ncols, header.nrows), (4, 3));
    assert_eq!(header.xll, dec("1000"));
    assert_eq!(header.yll, dec("2000"));
    assert_eq!(header.cellsize, dec("25"));
    assert_eq!(header.nodata, Some(-9999.0));

    let text = fs::read_to_string(&exported).unwrap();
    let body: Vec<&str> = text.lines().skip(6).collect();
    assert_eq!(body, vec!["1 2 3 4", "5 6 -9999 8", "9 10 11 12"]);

    let again = import(&env, &exported, Grid::<i32>::builder().dir(dir.path().join("again"))).unwrap();
    for row in 0..3 {
        for col in 0..4 {
            assert_eq!(again.get_cell(row, col).unwrap(), grid.get_cell(row, col).unwrap());
        }
    }
}
