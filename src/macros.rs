//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32, U64, I32, I64). Used by the file
//! headers in `storage::headers`.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{I64, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     nrows: I64,
//!     record_count: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         nrows: i64,
//!         record_count: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn nrows(&self) -> i64 { self.nrows.get() }
//! // pub fn set_nrows(&mut self, val: i64) { self.nrows = I64::new(val); }
//! // pub fn record_count(&self) -> u32 { self.record_count.get() }
//! // pub fn set_record_count(&mut self, val: u32) { self.record_count = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        $crate::zerocopy_accessors!(@impl $field, u16, U16);
    };
    (@impl $field:ident, u32) => {
        $crate::zerocopy_accessors!(@impl $field, u32, U32);
    };
    (@impl $field:ident, u64) => {
        $crate::zerocopy_accessors!(@impl $field, u64, U64);
    };
    (@impl $field:ident, i32) => {
        $crate::zerocopy_accessors!(@impl $field, i32, I32);
    };
    (@impl $field:ident, i64) => {
        $crate::zerocopy_accessors!(@impl $field, i64, I64);
    };
    (@impl $field:ident, $native:ty, $wrapper:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $native {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $native) {
                self.$field = ::zerocopy::little_endian::$wrapper::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
