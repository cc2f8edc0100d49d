//! Register data types.
//!
//! This module defines the [`DataType`] enum which describes how a logical
//! register is laid out in device memory. The width of each type is given in
//! bytes and may be fractional: a [`DataType::Bool`] occupies one eighth of a
//! byte.
//!
//! # Data Types Overview
//!
//! | Type | Width (bytes) | Signed |
//! |------|:-------------:|:------:|
//! | Bool | 0.125 | ✗ |
//! | U8 / I8 | 1 | ✗ / ✓ |
//! | U16 / I16 | 2 | ✗ / ✓ |
//! | U32 / I32 | 4 | ✗ / ✓ |
//! | U64 / I64 | 8 | ✗ / ✓ |
//! | F32 | 4 | ✓ |
//! | F64 | 8 | ✓ |
//!
//! # Example
//!
//! ```
//! use plc_registers::DataType;
//!
//! assert_eq!(DataType::U16.byte_width(), 2.0);
//! assert_eq!(DataType::Bool.byte_width(), 0.125);
//! assert!(DataType::Bool.is_bit());
//! assert_eq!(DataType::F32.to_string(), "f32");
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Native type of a logical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataType {
    /// A single bit.
    Bool,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    I64,
    /// IEEE 754 single precision float.
    F32,
    /// IEEE 754 double precision float.
    F64,
}

impl DataType {
    /// Returns the number of bytes one value of this type occupies.
    pub fn byte_width(self) -> f64 {
        match self {
            DataType::Bool => 0.125,
            DataType::U8 | DataType::I8 => 1.0,
            DataType::U16 | DataType::I16 => 2.0,
            DataType::U32 | DataType::I32 | DataType::F32 => 4.0,
            DataType::U64 | DataType::I64 | DataType::F64 => 8.0,
        }
    }

    /// Returns the number of whole bytes that must be transferred to hold one value.
    pub fn whole_bytes(self) -> usize {
        self.byte_width().ceil() as usize
    }

    /// Returns whether this is a sub-byte (bit) type.
    pub fn is_bit(self) -> bool {
        matches!(self, DataType::Bool)
    }

    /// Returns whether this is a floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::U8 => "u8",
            DataType::I8 => "i8",
            DataType::U16 => "u16",
            DataType::I16 => "i16",
            DataType::U32 => "u32",
            DataType::I32 => "i32",
            DataType::U64 => "u64",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        };
        f.write_str(name)
    }
}
