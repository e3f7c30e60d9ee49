//! Text interchange formats for grids.

pub mod ascii;

pub use ascii::{export, import, read_header, AsciiHeader};
