//! # ESRI ASCII Grids
//!
//! ```text
//! ncols         4
//! nrows         3
//! xllcorner     1000.0        or xllcenter
//! yllcorner     2000.0        or yllcenter
//! cellsize      25.0
//! NODATA_value  -9999         optional
//! 1 2 3 4                     top row (highest y)
//! 5 6 -9999 8
//! 9 10 11 12                  bottom row, grid row 0
//! ```
//!
//! Keys are matched case-insensitively. Body values are whitespace separated
//! and may wrap across lines freely; only their count matters. The first
//! value belongs to the north-west cell, so the first body line fills grid
//! row `nrows - 1`.
//!
//! When the header names a no-data value it becomes the grid's no-data;
//! otherwise the builder's no-data is kept.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::info;

use crate::environment::Environment;
use crate::geometry::Dimensions;
use crate::grid::{CellValue, Grid, GridBuilder};

#[derive(Debug, Clone, PartialEq)]
pub struct AsciiHeader {
    pub ncols: i64,
    pub nrows: i64,
    pub xll: BigDecimal,
    pub yll: BigDecimal,
    /// `xllcenter`/`yllcenter` rather than `xllcorner`/`yllcorner`.
    pub centered: bool,
    pub cellsize: BigDecimal,
    pub nodata: Option<f64>,
}

impl AsciiHeader {
    /// Bounding box of the grid the header describes.
    pub fn dimensions(&self) -> Result<Dimensions> {
        let (xmin, ymin) = if self.centered {
            let half = &self.cellsize / BigDecimal::from(2);
            (&self.xll - &half, &self.yll - &half)
        } else {
            (self.xll.clone(), self.yll.clone())
        };
        Dimensions::from_origin(self.cellsize.clone(), xmin, ymin, self.nrows, self.ncols)
    }
}

#[derive(Default)]
struct PartialHeader {
    ncols: Option<i64>,
    nrows: Option<i64>,
    xll: Option<(BigDecimal, bool)>,
    yll: Option<(BigDecimal, bool)>,
    cellsize: Option<BigDecimal>,
    nodata: Option<f64>,
}

fn parse_decimal(key: &str, text: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(text).map_err(|e| eyre!("invalid {} '{}': {}", key, text, e))
}

fn parse_count(key: &str, text: &str) -> Result<i64> {
    let n: i64 = text
        .parse()
        .map_err(|e| eyre!("invalid {} '{}': {}", key, text, e))?;
    ensure!(n > 0, "{} must be positive, got {}", key, n);
    Ok(n)
}

impl PartialHeader {
    /// Applies one `key value` line. Returns false when the line is not a
    /// header line, which marks the start of the body.
    fn apply(&mut self, line: &str) -> Result<bool> {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            return Ok(false);
        };
        if !key.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Ok(false);
        }

        match key.to_ascii_lowercase().as_str() {
            "ncols" => self.ncols = Some(parse_count(key, value)?),
            "nrows" => self.nrows = Some(parse_count(key, value)?),
            "xllcorner" => self.xll = Some((parse_decimal(key, value)?, false)),
            "xllcenter" => self.xll = Some((parse_decimal(key, value)?, true)),
            "yllcorner" => self.yll = Some((parse_decimal(key, value)?, false)),
            "yllcenter" => self.yll = Some((parse_decimal(key, value)?, true)),
            "cellsize" => self.cellsize = Some(parse_decimal(key, value)?),
            "nodata_value" => {
                self.nodata = Some(
                    value
                        .parse()
                        .map_err(|e| eyre!("invalid {} '{}': {}", key, value, e))?,
                )
            }
            _ => bail!("unknown header key '{}'", key),
        }
        Ok(true)
    }

    fn finish(self) -> Result<AsciiHeader> {
        let ncols = self.ncols.ok_or_else(|| eyre!("header is missing ncols"))?;
        let nrows = self.nrows.ok_or_else(|| eyre!("header is missing nrows"))?;
        let (xll, x_centered) = self
            .xll
            .ok_or_else(|| eyre!("header is missing xllcorner/xllcenter"))?;
        let (yll, y_centered) = self
            .yll
            .ok_or_else(|| eyre!("header is missing yllcorner/yllcenter"))?;
        ensure!(
            x_centered == y_centered,
            "header mixes corner and center origins"
        );
        let cellsize = self
            .cellsize
            .ok_or_else(|| eyre!("header is missing cellsize"))?;

        Ok(AsciiHeader {
            ncols,
            nrows,
            xll,
            yll,
            centered: x_centered,
            cellsize,
            nodata: self.nodata,
        })
    }
}

/// Reads the header, returning it with the first body line if one was
/// already consumed.
fn parse_header(reader: &mut impl BufRead) -> Result<(AsciiHeader, Option<String>)> {
    let mut partial = PartialHeader::default();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok((partial.finish()?, None));
        }
        if line.trim().is_empty() {
            continue;
        }
        if !partial.apply(&line)? {
            return Ok((partial.finish()?, Some(line)));
        }
    }
}

/// Reads only the header of an ASCII grid file.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<AsciiHeader> {
    let path = path.as_ref();
    let file = File::open(path).wrap_err_with(|| format!("failed to open '{}'", path.display()))?;
    let (header, _) = parse_header(&mut BufReader::new(file))
        .wrap_err_with(|| format!("invalid ASCII grid header in '{}'", path.display()))?;
    Ok(header)
}

/// Creates a grid from an ASCII grid file. The builder supplies everything
/// the file does not: directory, chunk shape, encoding and statistics mode.
pub fn import<V: CellValue, P: AsRef<Path>>(
    env: &Environment,
    source: P,
    builder: GridBuilder<V>,
) -> Result<Grid<V>> {
    let source = source.as_ref();
    let file =
        File::open(source).wrap_err_with(|| format!("failed to open '{}'", source.display()))?;
    let mut reader = BufReader::new(file);
    let (header, first) = parse_header(&mut reader)
        .wrap_err_with(|| format!("invalid ASCII grid header in '{}'", source.display()))?;

    let mut builder = builder
        .shape(header.nrows, header.ncols)
        .dimensions(header.dimensions()?);
    if let Some(nodata) = header.nodata {
        builder = builder.nodata(V::from_f64(nodata));
    }
    let grid = builder.create(env)?;
    let nodata = grid.nodata();

    let expected = header.nrows * header.ncols;
    let mut index = 0i64;
    let mut line = first.unwrap_or_default();
    loop {
        for token in line.split_whitespace() {
            ensure!(
                index < expected,
                "'{}' holds more than {} values",
                source.display(),
                expected
            );
            let value: f64 = token
                .parse()
                .map_err(|e| eyre!("invalid value '{}' in '{}': {}", token, source.display(), e))?;
            let value = V::from_f64(value);
            if !value.is_nodata(nodata) {
                let row = header.nrows - 1 - index / header.ncols;
                let col = index % header.ncols;
                grid.init_cell(row, col, value)?;
            }
            index += 1;
        }

        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
    }
    ensure!(
        index == expected,
        "'{}' holds {} values, expected {}",
        source.display(),
        index,
        expected
    );

    grid.flush()?;
    info!(
        "imported '{}' into {} ({}x{})",
        source.display(),
        grid.id(),
        header.nrows,
        header.ncols
    );
    Ok(grid)
}

/// Writes `grid` as an ASCII grid file with a corner origin.
pub fn export<V: CellValue, P: AsRef<Path>>(grid: &Grid<V>, path: P) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).wrap_err_with(|| format!("failed to create '{}'", path.display()))?;
    let mut out = BufWriter::new(file);
    let dims = grid.dimensions();

    writeln!(out, "ncols {}", grid.ncols())?;
    writeln!(out, "nrows {}", grid.nrows())?;
    writeln!(out, "xllcorner {}", dims.xmin())?;
    writeln!(out, "yllcorner {}", dims.ymin())?;
    writeln!(out, "cellsize {}", dims.cellsize())?;
    writeln!(out, "NODATA_value {}", grid.nodata().to_f64())?;

    for row in (0..grid.nrows()).rev() {
        for col in 0..grid.ncols() {
            if col > 0 {
                out.write_all(b" ")?;
            }
            write!(out, "{}", grid.get_cell(row, col)?.to_f64())?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()
        .wrap_err_with(|| format!("failed to write '{}'", path.display()))?;

    info!("exported {} to '{}'", grid.id(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_keys_are_case_insensitive() {
        let text = "NCOLS 3\nnRows 2\nXLLCORNER 10\nyllcorner -5.5\nCellSize 0.5\nnodata_VALUE -1\n1 2 3\n";
        let (header, first) = parse_header(&mut Cursor::new(text)).unwrap();
        assert_eq!((header.ncols, header.nrows), (3, 2));
        assert_eq!(header.nodata, Some(-1.0));
        assert!(!header.centered);
        assert_eq!(first.as_deref(), Some("1 2 3\n"));
    }

    #[test]
    fn test_nodata_is_optional() {
        let text = "ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n7\n";
        let (header, first) = parse_header(&mut Cursor::new(text)).unwrap();
        assert_eq!(header.nodata, None);
        assert_eq!(first.as_deref(), Some("7\n"));
    }

    #[test]
    fn test_center_origin_shifts_half_a_cell() {
        let text = "ncols 2\nnrows 2\nxllcenter 1\nyllcenter 1\ncellsize 2\n";
        let (header, _) = parse_header(&mut Cursor::new(text)).unwrap();
        let dims = header.dimensions().unwrap();
        assert_eq!(dims.xmin(), &BigDecimal::from(0));
        assert_eq!(dims.ymax(), &BigDecimal::from(4));
    }

    #[test]
    fn test_missing_key_is_reported() {
        let text = "ncols 2\nnrows 2\nxllcorner 0\ncellsize 1\n1 2\n3 4\n";
        let err = parse_header(&mut Cursor::new(text)).unwrap_err();
        assert!(err.to_string().contains("yllcorner"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let text = "ncols 2\nbands 3\n";
        assert!(parse_header(&mut Cursor::new(text)).is_err());
    }
}
