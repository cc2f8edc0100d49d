//! Protocol coordinate arithmetic.
//!
//! A protocol coordinate linearises an `(address, sub_address)` pair inside
//! one area into a single scalar. One unit of coordinate is one addressable
//! unit of the area, which occupies `area_width` bytes. A bit offset advances
//! the coordinate by `0.125 / area_width`.
//!
//! All widths handled here are dyadic fractions (0.125, 1, 2, ...), so the
//! arithmetic is exact in `f64`.
//!
//! # Example
//!
//! ```
//! use plc_registers::coordinate::{coordinate, next_coordinate, byte_offset};
//! use plc_registers::DataType;
//!
//! // Holding registers are 2 bytes wide: bit 8 of register 3 starts halfway.
//! assert_eq!(coordinate(3, 8, 2.0), 3.5);
//!
//! // A u32 in a 2-byte area spans two registers.
//! assert_eq!(next_coordinate(3.0, DataType::U32, 2.0), 5.0);
//!
//! // Register 5 is 4 bytes after register 3.
//! assert_eq!(byte_offset(5.0, 3.0, 2.0), 4.0);
//! ```

use crate::data_type::DataType;

/// Returns the protocol coordinate of an address and bit offset.
#[inline]
pub fn coordinate(address: u32, sub_address: u8, area_width: f64) -> f64 {
    f64::from(address) + f64::from(sub_address) * 0.125 / area_width
}

/// Returns the coordinate just past a value of `data_type` starting at `coordinate`.
#[inline]
pub fn next_coordinate(coordinate: f64, data_type: DataType, area_width: f64) -> f64 {
    coordinate + data_type.byte_width() / area_width
}

/// Returns the byte distance from `start` to `coordinate`.
#[inline]
pub fn byte_offset(coordinate: f64, start: f64, area_width: f64) -> f64 {
    (coordinate - start) * area_width
}

/// Returns the number of whole bytes needed to cover `[start, end)`.
#[inline]
pub fn span_bytes(start: f64, end: f64, area_width: f64) -> usize {
    byte_offset(end, start, area_width).ceil().max(0.0) as usize
}

/// Splits a byte distance into a whole byte index and a bit index (0-7).
#[inline]
pub fn split_byte_offset(offset: f64) -> (usize, u8) {
    let byte = offset.floor();
    let bit = ((offset - byte) * 8.0).round() as u8;
    (byte as usize, bit)
}
