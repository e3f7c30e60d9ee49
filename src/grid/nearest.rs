//! # Nearest-Value Search
//!
//! Finds the data cells closest to a query point, by Euclidean distance
//! between the point and cell centroids.
//!
//! ## Algorithm
//!
//! ```text
//!   ring 2      . . . . .
//!   ring 1      . o o o .      o  examined, no-data: neighbours enqueued
//!   start       . o S o .      *  examined, data: recorded, not expanded
//!               . o o * .
//!               . . . . .
//! ```
//!
//! 1. If the start cell holds a value it is the answer, reported at distance
//!    zero wherever the query point lies inside it.
//! 2. Breadth-first over 8-connected rings. Every data cell met is recorded;
//!    every no-data cell enqueues its unvisited in-grid neighbours. Once a
//!    ring records a hit the ring is finished and the expansion stops. An
//!    empty frontier with no hit means the grid holds no value reachable from
//!    the start.
//! 3. Ring order is Chebyshev order, which is not Euclidean order: a cell one
//!    ring further out can still be closer to an off-centre query point. A
//!    second pass visits every unexamined in-grid cell whose centroid lies
//!    within the best distance found so far and records it if it holds data.
//! 4. The answer is every recorded cell at the minimum distance, ties
//!    included, with the mean of their values.
//!
//! Distances here are in cell units; the grid scales them by the cell size.

use eyre::Result;
use hashbrown::HashSet;

use super::{CellId, CellValue, GridShape};

/// Two distances closer than this are a tie.
const TIE_EPSILON: f64 = 1e-9;

/// The closest data cells to a query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestValues {
    /// Every cell at the minimum distance, in discovery order.
    pub cells: Vec<CellId>,
    /// Distance from the query point to the centroids of `cells`.
    pub distance: f64,
    /// Mean of the values held by `cells`.
    pub mean: f64,
}

/// Distance in cell units from `point` (row, col) to the centroid of `cell`.
pub(crate) fn centroid_distance(point: (f64, f64), cell: CellId) -> f64 {
    let dr = cell.row as f64 + 0.5 - point.0;
    let dc = cell.col as f64 + 0.5 - point.1;
    (dr * dr + dc * dc).sqrt()
}

/// Runs the search from `start` for the query point `point`, given in
/// fractional cell units. `value_at` is called once per examined cell.
pub(crate) fn search<V: CellValue>(
    shape: &GridShape,
    start: CellId,
    point: (f64, f64),
    nodata: V,
    mut value_at: impl FnMut(CellId) -> Result<V>,
) -> Result<Option<NearestValues>> {
    if !shape.contains_cell(start) {
        return Ok(None);
    }

    let value = value_at(start)?;
    if !value.is_nodata(nodata) {
        return Ok(Some(NearestValues {
            cells: vec![start],
            distance: 0.0,
            mean: value.to_f64(),
        }));
    }

    let mut visited = HashSet::new();
    visited.insert(start);
    let mut frontier = vec![start];
    let mut found: Vec<(CellId, V)> = Vec::new();

    loop {
        let mut next = Vec::new();
        for cell in &frontier {
            for n in cell.neighbours() {
                if !shape.contains_cell(n) || !visited.insert(n) {
                    continue;
                }
                let v = value_at(n)?;
                if v.is_nodata(nodata) {
                    next.push(n);
                } else {
                    found.push((n, v));
                }
            }
        }
        if !found.is_empty() {
            break;
        }
        if next.is_empty() {
            return Ok(None);
        }
        frontier = next;
    }

    let mut best = found
        .iter()
        .map(|(cell, _)| centroid_distance(point, *cell))
        .fold(f64::INFINITY, f64::min);

    let row_lo = ((point.0 - best - 0.5).ceil() as i64).max(0);
    let row_hi = ((point.0 + best - 0.5).floor() as i64).min(shape.nrows() - 1);
    let col_lo = ((point.1 - best - 0.5).ceil() as i64).max(0);
    let col_hi = ((point.1 + best - 0.5).floor() as i64).min(shape.ncols() - 1);
    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let cell = CellId::new(row, col);
            if visited.contains(&cell) {
                continue;
            }
            let d = centroid_distance(point, cell);
            if d > best + TIE_EPSILON {
                continue;
            }
            let v = value_at(cell)?;
            if !v.is_nodata(nodata) {
                found.push((cell, v));
                best = best.min(d);
            }
        }
    }

    let nearest: Vec<(CellId, V)> = found
        .into_iter()
        .filter(|(cell, _)| centroid_distance(point, *cell) <= best + TIE_EPSILON)
        .collect();
    let mean = nearest.iter().map(|(_, v)| v.to_f64()).sum::<f64>() / nearest.len() as f64;

    Ok(Some(NearestValues {
        cells: nearest.into_iter().map(|(cell, _)| cell).collect(),
        distance: best,
        mean,
    }))
}
