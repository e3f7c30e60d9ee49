//! # Grid Geometry
//!
//! [`Dimensions`] places a grid in space: a square cell size and a bounding
//! box, all kept as [`BigDecimal`] so coordinates read from text keep their
//! exact decimal value.
//!
//! ## Orientation
//!
//! ```text
//!  y
//!  ^   ymax +-------+-------+
//!  |        | (1,0) | (1,1) |   row nrows-1 is the top row
//!  |        +-------+-------+
//!  |        | (0,0) | (0,1) |   row 0 touches ymin
//!  |   ymin +-------+-------+
//!  |       xmin            xmax
//!  +--------------------------> x
//! ```
//!
//! Rows grow with y and columns grow with x. A coordinate maps to the cell
//! whose lower-left corner is at or below it, `floor((c - min) / cellsize)`,
//! rounding toward negative infinity. The max boundary belongs to the last
//! row or column, so [`Dimensions::contains`] is inclusive on both ends.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode};
use eyre::{ensure, eyre, Result};
use num_traits::{ToPrimitive, Zero};

#[derive(Debug, Clone, PartialEq)]
pub struct Dimensions {
    cellsize: BigDecimal,
    xmin: BigDecimal,
    ymin: BigDecimal,
    xmax: BigDecimal,
    ymax: BigDecimal,
}

impl Dimensions {
    pub fn new(
        cellsize: BigDecimal,
        xmin: BigDecimal,
        ymin: BigDecimal,
        xmax: BigDecimal,
        ymax: BigDecimal,
    ) -> Result<Self> {
        ensure!(cellsize > BigDecimal::zero(), "cell size must be positive, got {}", cellsize);
        ensure!(xmax > xmin, "xmax {} must exceed xmin {}", xmax, xmin);
        ensure!(ymax > ymin, "ymax {} must exceed ymin {}", ymax, ymin);
        Ok(Self {
            cellsize,
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// Dimensions of an `nrows x ncols` grid with its lower-left corner at
    /// `(xmin, ymin)`.
    pub fn from_origin(
        cellsize: BigDecimal,
        xmin: BigDecimal,
        ymin: BigDecimal,
        nrows: i64,
        ncols: i64,
    ) -> Result<Self> {
        let xmax = &xmin + &cellsize * BigDecimal::from(ncols);
        let ymax = &ymin + &cellsize * BigDecimal::from(nrows);
        Self::new(cellsize, xmin, ymin, xmax, ymax)
    }

    /// Unit cells with the origin at zero.
    pub fn unit(nrows: i64, ncols: i64) -> Self {
        Self {
            cellsize: BigDecimal::from(1),
            xmin: BigDecimal::zero(),
            ymin: BigDecimal::zero(),
            xmax: BigDecimal::from(ncols),
            ymax: BigDecimal::from(nrows),
        }
    }

    /// Parses the five decimal strings in the order cell size, xmin, ymin,
    /// xmax, ymax.
    pub fn parse(parts: &[&str; 5]) -> Result<Self> {
        let mut values = Vec::with_capacity(5);
        for part in parts {
            values.push(
                BigDecimal::from_str(part)
                    .map_err(|e| eyre!("invalid decimal '{}': {}", part, e))?,
            );
        }
        let mut it = values.into_iter();
        match (it.next(), it.next(), it.next(), it.next(), it.next()) {
            (Some(cellsize), Some(xmin), Some(ymin), Some(xmax), Some(ymax)) => {
                Self::new(cellsize, xmin, ymin, xmax, ymax)
            }
            _ => Err(eyre!("expected five dimension values")),
        }
    }

    /// The five values as decimal strings, in [`Dimensions::parse`] order.
    pub fn to_strings(&self) -> [String; 5] {
        [
            self.cellsize.to_string(),
            self.xmin.to_string(),
            self.ymin.to_string(),
            self.xmax.to_string(),
            self.ymax.to_string(),
        ]
    }

    pub fn cellsize(&self) -> &BigDecimal {
        &self.cellsize
    }

    pub fn xmin(&self) -> &BigDecimal {
        &self.xmin
    }

    pub fn ymin(&self) -> &BigDecimal {
        &self.ymin
    }

    pub fn xmax(&self) -> &BigDecimal {
        &self.xmax
    }

    pub fn ymax(&self) -> &BigDecimal {
        &self.ymax
    }

    pub fn cellsize_f64(&self) -> f64 {
        self.cellsize.to_f64().unwrap_or(f64::NAN)
    }

    pub fn contains(&self, x: &BigDecimal, y: &BigDecimal) -> bool {
        x >= &self.xmin && x <= &self.xmax && y >= &self.ymin && y <= &self.ymax
    }

    fn index(&self, coord: &BigDecimal, min: &BigDecimal, max: &BigDecimal, n: i64) -> i64 {
        if coord == max {
            return n - 1;
        }
        let cells = (coord - min) / &self.cellsize;
        cells
            .with_scale_round(0, RoundingMode::Floor)
            .to_i64()
            .unwrap_or(if coord < min { i64::MIN } else { i64::MAX })
    }

    /// Column holding `x`; values outside `0..ncols` mean outside the grid.
    pub fn cell_col(&self, x: &BigDecimal, ncols: i64) -> i64 {
        self.index(x, &self.xmin, &self.xmax, ncols)
    }

    /// Row holding `y`; values outside `0..nrows` mean outside the grid.
    pub fn cell_row(&self, y: &BigDecimal, nrows: i64) -> i64 {
        self.index(y, &self.ymin, &self.ymax, nrows)
    }

    pub fn cell_centroid_x(&self, col: i64) -> BigDecimal {
        &self.xmin + &self.cellsize * (BigDecimal::from(col) + BigDecimal::new(5.into(), 1))
    }

    pub fn cell_centroid_y(&self, row: i64) -> BigDecimal {
        &self.ymin + &self.cellsize * (BigDecimal::from(row) + BigDecimal::new(5.into(), 1))
    }

    /// Position of `(x, y)` in fractional cell units from the lower-left
    /// corner. The centroid of cell `(row, col)` is `(row + 0.5, col + 0.5)`.
    pub fn to_cell_units(&self, x: &BigDecimal, y: &BigDecimal) -> (f64, f64) {
        let row = ((y - &self.ymin) / &self.cellsize).to_f64().unwrap_or(f64::NAN);
        let col = ((x - &self.xmin) / &self.cellsize).to_f64().unwrap_or(f64::NAN);
        (row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn dims() -> Dimensions {
        Dimensions::from_origin(dec("0.5"), dec("100"), dec("-2"), 4, 6).unwrap()
    }

    #[test]
    fn from_origin_computes_bounds() {
        let d = dims();
        assert_eq!(d.xmax(), &dec("103"));
        assert_eq!(d.ymax(), &dec("0"));
    }

    #[test]
    fn coordinates_floor_toward_negative_infinity() {
        let d = dims();
        assert_eq!(d.cell_col(&dec("100"), 6), 0);
        assert_eq!(d.cell_col(&dec("100.49"), 6), 0);
        assert_eq!(d.cell_col(&dec("100.5"), 6), 1);
        assert_eq!(d.cell_col(&dec("99.9"), 6), -1);
        assert_eq!(d.cell_row(&dec("-2.0001"), 4), -1);
    }

    #[test]
    fn max_boundary_maps_to_last_cell() {
        let d = dims();
        assert!(d.contains(&dec("103"), &dec("0")));
        assert_eq!(d.cell_col(&dec("103"), 6), 5);
        assert_eq!(d.cell_row(&dec("0"), 4), 3);
        assert!(!d.contains(&dec("103.01"), &dec("0")));
    }

    #[test]
    fn centroids_sit_mid_cell() {
        let d = dims();
        assert_eq!(d.cell_centroid_x(0), dec("100.25"));
        assert_eq!(d.cell_centroid_y(3), dec("-0.25"));
    }

    #[test]
    fn string_form_round_trips_exactly() {
        let d = Dimensions::from_origin(dec("0.1"), dec("0.3"), dec("0"), 3, 3).unwrap();
        let strings = d.to_strings();
        let refs = [
            strings[0].as_str(),
            strings[1].as_str(),
            strings[2].as_str(),
            strings[3].as_str(),
            strings[4].as_str(),
        ];
        assert_eq!(Dimensions::parse(&refs).unwrap(), d);
    }

    #[test]
    fn rejects_non_positive_cellsize() {
        assert!(Dimensions::from_origin(dec("0"), dec("0"), dec("0"), 1, 1).is_err());
    }
}
