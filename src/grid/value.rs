//! # Cell Value Types
//!
//! A grid stores one numeric type. [`CellValue`] captures what the engine
//! needs from that type: a no-data default, a fixed little-endian wire form
//! for chunk files and mapped stores, a statistics accumulator, and lossy
//! conversion to and from `f64` for averaging and ASCII import.
//!
//! | Type  | Default no-data | Wire width | Sum accumulator |
//! |-------|-----------------|------------|-----------------|
//! | `i32` | `i32::MIN`      | 4 bytes    | `i64` (exact)   |
//! | `f64` | `-f64::MAX`     | 8 bytes    | `f64`           |

use std::fmt::Debug;
use std::ops::{AddAssign, SubAssign};

pub trait CellValue:
    Copy + PartialEq + PartialOrd + Debug + Send + Sync + 'static
{
    /// Accumulator used for running sums.
    type Sum: Copy + Default + Debug + PartialEq + AddAssign + SubAssign + Send + Sync;

    /// Tag written to file headers so a chunk of one type is never read as another.
    const TYPE_TAG: u8;
    const WIDTH: usize;
    const NAME: &'static str;

    fn default_nodata() -> Self;

    fn widen(self) -> Self::Sum;
    fn sum_to_f64(sum: Self::Sum) -> f64;
    fn sum_to_bits(sum: Self::Sum) -> u64;
    fn sum_from_bits(bits: u64) -> Self::Sum;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;

    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;

    /// Writes `WIDTH` little-endian bytes to the front of `out`.
    fn write_le(self, out: &mut [u8]);
    /// Reads `WIDTH` little-endian bytes from the front of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;

    fn is_nodata(self, nodata: Self) -> bool {
        self == nodata
    }
}

impl CellValue for i32 {
    type Sum = i64;

    const TYPE_TAG: u8 = 1;
    const WIDTH: usize = 4;
    const NAME: &'static str = "i32";

    fn default_nodata() -> Self {
        i32::MIN
    }

    fn widen(self) -> i64 {
        self as i64
    }

    fn sum_to_f64(sum: i64) -> f64 {
        sum as f64
    }

    fn sum_to_bits(sum: i64) -> u64 {
        sum as u64
    }

    fn sum_from_bits(bits: u64) -> i64 {
        bits as i64
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round() as i32
    }

    fn to_bits(self) -> u64 {
        self as u32 as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u32 as i32
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        i32::from_le_bytes(raw)
    }
}

impl CellValue for f64 {
    type Sum = f64;

    const TYPE_TAG: u8 = 2;
    const WIDTH: usize = 8;
    const NAME: &'static str = "f64";

    fn default_nodata() -> Self {
        -f64::MAX
    }

    fn widen(self) -> f64 {
        self
    }

    fn sum_to_f64(sum: f64) -> f64 {
        sum
    }

    fn sum_to_bits(sum: f64) -> u64 {
        sum.to_bits()
    }

    fn sum_from_bits(bits: u64) -> f64 {
        f64::from_bits(bits)
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(raw)
    }

    // NaN is a legal no-data marker for float grids.
    fn is_nodata(self, nodata: Self) -> bool {
        self == nodata || (self.is_nan() && nodata.is_nan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_bits_preserve_sign() {
        assert_eq!(i32::from_bits((-7i32).to_bits()), -7);
        assert_eq!(i32::from_bits(i32::MIN.to_bits()), i32::MIN);
    }

    #[test]
    fn f64_le_bytes() {
        let mut buf = [0u8; 8];
        1.5f64.write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), 1.5);
    }

    #[test]
    fn nan_nodata_matches_nan() {
        assert!(f64::NAN.is_nodata(f64::NAN));
        assert!(!1.0f64.is_nodata(f64::NAN));
        assert!((-f64::MAX).is_nodata(f64::default_nodata()));
    }

    #[test]
    fn i32_from_f64_rounds() {
        assert_eq!(i32::from_f64(2.5), 3);
        assert_eq!(i32::from_f64(-2.4), -2);
    }

    #[test]
    fn i64_sum_bits() {
        assert_eq!(i32::sum_from_bits(i32::sum_to_bits(-42)), -42);
    }
}
