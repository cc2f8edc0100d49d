//! Endian-aware value codec.
//!
//! This module provides [`ValueCodec`], which extracts typed values from raw
//! device buffers and patches them back in place, and [`Value`], the typed
//! native representation exchanged with the codec.
//!
//! # Byte and Bit Order
//!
//! | Endian | Multi-byte layout | Bit 0 of a byte |
//! |--------|-------------------|-----------------|
//! | [`Endian::LittleEndianLsb`] | least significant byte first | LSB |
//! | [`Endian::BigEndianLsb`] | most significant byte first | LSB |
//! | [`Endian::BigEndianMsb`] | most significant byte first | MSB |
//! | [`Endian::WordSwappedLsb`] | big-endian 16-bit words, least significant word first | LSB |
//!
//! # Example
//!
//! ```
//! use plc_registers::{DataType, Endian, Value, ValueCodec};
//!
//! let codec = ValueCodec::new(Endian::BigEndianLsb);
//! let mut buffer = vec![0u8; 4];
//!
//! codec.patch(&mut buffer, 0, 0, Value::U16(0x1234)).unwrap();
//! codec.patch(&mut buffer, 2, 5, Value::Bool(true)).unwrap();
//! assert_eq!(buffer, [0x12, 0x34, 0b0010_0000, 0x00]);
//!
//! assert_eq!(codec.extract(&buffer, 0, 0, DataType::U16).unwrap(), Value::U16(0x1234));
//! assert_eq!(codec.extract(&buffer, 2, 5, DataType::Bool).unwrap(), Value::Bool(true));
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::error::{RegisterError, Result};
use crate::utils::{byte_to_bits, get_bit, set_bit};

/// Byte and bit order of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Endian {
    /// Little-endian values, bit 0 is the least significant bit of a byte.
    LittleEndianLsb,
    /// Big-endian values, bit 0 is the least significant bit of a byte.
    #[default]
    BigEndianLsb,
    /// Big-endian values, bit 0 is the most significant bit of a byte.
    BigEndianMsb,
    /// Big-endian 16-bit words stored least significant word first.
    WordSwappedLsb,
}

impl Endian {
    /// Maps a logical bit offset onto the physical bit position inside a byte.
    fn bit_position(self, bit: u8) -> u8 {
        match self {
            Endian::BigEndianMsb => 7 - bit,
            _ => bit,
        }
    }

    /// Converts between big-endian order and this layout. The permutation is
    /// its own inverse, so it serves both directions.
    fn arrange(self, bytes: &mut [u8]) {
        match self {
            Endian::BigEndianLsb | Endian::BigEndianMsb => {}
            Endian::LittleEndianLsb => bytes.reverse(),
            Endian::WordSwappedLsb => {
                bytes.reverse();
                for word in bytes.chunks_exact_mut(2) {
                    word.reverse();
                }
            }
        }
    }
}

/// A typed register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A single bit.
    Bool(bool),
    /// Unsigned 8-bit value.
    U8(u8),
    /// Signed 8-bit value.
    I8(i8),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Signed 16-bit value.
    I16(i16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// Signed 32-bit value.
    I32(i32),
    /// Unsigned 64-bit value.
    U64(u64),
    /// Signed 64-bit value.
    I64(i64),
    /// Single precision float.
    F32(f32),
    /// Double precision float.
    F64(f64),
}

macro_rules! narrow_int {
    ($variant:ident, $ty:ty, $value:expr, $data_type:expr) => {{
        let value: f64 = $value;
        if !value.is_finite() {
            return Err(RegisterError::decode(format!(
                "{value} cannot be stored as {}",
                $data_type
            )));
        }
        let rounded = value.round_ties_even();
        // MAX + 1 is a power of two, so the exclusive bound is exact in f64
        // even where MAX itself is not.
        if rounded < <$ty>::MIN as f64 || rounded >= <$ty>::MAX as f64 + 1.0 {
            return Err(RegisterError::decode(format!(
                "{value} is out of range for {}",
                $data_type
            )));
        }
        Value::$variant(rounded as $ty)
    }};
}

impl Value {
    /// Returns the [`DataType`] of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::U8(_) => DataType::U8,
            Value::I8(_) => DataType::I8,
            Value::U16(_) => DataType::U16,
            Value::I16(_) => DataType::I16,
            Value::U32(_) => DataType::U32,
            Value::I32(_) => DataType::I32,
            Value::U64(_) => DataType::U64,
            Value::I64(_) => DataType::I64,
            Value::F32(_) => DataType::F32,
            Value::F64(_) => DataType::F64,
        }
    }

    /// Widens the value to `f64`. Bits become 0 or 1.
    pub fn to_f64(self) -> f64 {
        match self {
            Value::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Value::U8(v) => f64::from(v),
            Value::I8(v) => f64::from(v),
            Value::U16(v) => f64::from(v),
            Value::I16(v) => f64::from(v),
            Value::U32(v) => f64::from(v),
            Value::I32(v) => f64::from(v),
            Value::U64(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::F32(v) => f64::from(v),
            Value::F64(v) => v,
        }
    }

    /// Narrows an `f64` to `data_type`.
    ///
    /// Integers are rounded half to even; any non-zero value is a set bit.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Decode`] if the value is not finite or out of
    /// range for an integer type, or too large for `F32`.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::{DataType, Value};
    ///
    /// assert_eq!(Value::from_f64(DataType::I16, -2.5).unwrap(), Value::I16(-2));
    /// assert_eq!(Value::from_f64(DataType::Bool, 3.0).unwrap(), Value::Bool(true));
    /// assert!(Value::from_f64(DataType::U8, 256.0).is_err());
    /// ```
    pub fn from_f64(data_type: DataType, value: f64) -> Result<Self> {
        Ok(match data_type {
            DataType::Bool => Value::Bool(value != 0.0),
            DataType::U8 => narrow_int!(U8, u8, value, data_type),
            DataType::I8 => narrow_int!(I8, i8, value, data_type),
            DataType::U16 => narrow_int!(U16, u16, value, data_type),
            DataType::I16 => narrow_int!(I16, i16, value, data_type),
            DataType::U32 => narrow_int!(U32, u32, value, data_type),
            DataType::I32 => narrow_int!(I32, i32, value, data_type),
            DataType::U64 => narrow_int!(U64, u64, value, data_type),
            DataType::I64 => narrow_int!(I64, i64, value, data_type),
            DataType::F32 => {
                let narrowed = value as f32;
                if narrowed.is_infinite() && value.is_finite() {
                    return Err(RegisterError::decode(format!(
                        "{value} is out of range for {data_type}"
                    )));
                }
                Value::F32(narrowed)
            }
            DataType::F64 => Value::F64(value),
        })
    }

    fn to_be_bytes(self) -> Vec<u8> {
        match self {
            Value::Bool(v) => vec![u8::from(v)],
            Value::U8(v) => v.to_be_bytes().to_vec(),
            Value::I8(v) => v.to_be_bytes().to_vec(),
            Value::U16(v) => v.to_be_bytes().to_vec(),
            Value::I16(v) => v.to_be_bytes().to_vec(),
            Value::U32(v) => v.to_be_bytes().to_vec(),
            Value::I32(v) => v.to_be_bytes().to_vec(),
            Value::U64(v) => v.to_be_bytes().to_vec(),
            Value::I64(v) => v.to_be_bytes().to_vec(),
            Value::F32(v) => v.to_be_bytes().to_vec(),
            Value::F64(v) => v.to_be_bytes().to_vec(),
        }
    }

    /// Builds a value from exactly `data_type.whole_bytes()` big-endian bytes.
    fn from_be_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
            bytes.try_into().map_err(|_| {
                RegisterError::decode(format!("expected {N} bytes, got {}", bytes.len()))
            })
        }
        Ok(match data_type {
            DataType::Bool => Value::Bool(array::<1>(bytes)?[0] != 0),
            DataType::U8 => Value::U8(u8::from_be_bytes(array(bytes)?)),
            DataType::I8 => Value::I8(i8::from_be_bytes(array(bytes)?)),
            DataType::U16 => Value::U16(u16::from_be_bytes(array(bytes)?)),
            DataType::I16 => Value::I16(i16::from_be_bytes(array(bytes)?)),
            DataType::U32 => Value::U32(u32::from_be_bytes(array(bytes)?)),
            DataType::I32 => Value::I32(i32::from_be_bytes(array(bytes)?)),
            DataType::U64 => Value::U64(u64::from_be_bytes(array(bytes)?)),
            DataType::I64 => Value::I64(i64::from_be_bytes(array(bytes)?)),
            DataType::F32 => Value::F32(f32::from_be_bytes(array(bytes)?)),
            DataType::F64 => Value::F64(f64::from_be_bytes(array(bytes)?)),
        })
    }
}

/// Extracts and patches typed values in raw buffers under one [`Endian`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueCodec {
    endian: Endian,
}

impl ValueCodec {
    /// Creates a codec for the given endian.
    pub const fn new(endian: Endian) -> Self {
        Self { endian }
    }

    /// Returns the endian of this codec.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns the number of bytes one value of `data_type` occupies.
    pub fn byte_width(&self, data_type: DataType) -> f64 {
        data_type.byte_width()
    }

    fn check_bounds(buffer_len: usize, byte_offset: usize, len: usize) -> Result<()> {
        if byte_offset + len > buffer_len {
            return Err(RegisterError::decode(format!(
                "{len} byte(s) at offset {byte_offset} exceed {buffer_len} byte buffer"
            )));
        }
        Ok(())
    }

    fn check_bit(data_type: DataType, bit_offset: u8) -> Result<()> {
        if data_type.is_bit() {
            if bit_offset > 7 {
                return Err(RegisterError::decode(format!(
                    "bit offset {bit_offset} must be 0-7"
                )));
            }
        } else if bit_offset != 0 {
            return Err(RegisterError::decode(format!(
                "{data_type} value cannot start at bit offset {bit_offset}"
            )));
        }
        Ok(())
    }

    /// Reads one value of `data_type` at `byte_offset`.
    ///
    /// Bit types read a single byte and return bit `bit_offset`; every other
    /// type must be byte aligned (`bit_offset == 0`).
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Decode`] if the value does not fit in the
    /// buffer or the bit offset is invalid for the type.
    pub fn extract(
        &self,
        buffer: &[u8],
        byte_offset: usize,
        bit_offset: u8,
        data_type: DataType,
    ) -> Result<Value> {
        Self::check_bit(data_type, bit_offset)?;
        let width = data_type.whole_bytes();
        Self::check_bounds(buffer.len(), byte_offset, width)?;

        if data_type.is_bit() {
            let byte = buffer[byte_offset];
            return Ok(Value::Bool(get_bit(
                byte,
                self.endian.bit_position(bit_offset),
            )));
        }

        let mut bytes = buffer[byte_offset..byte_offset + width].to_vec();
        self.endian.arrange(&mut bytes);
        Value::from_be_bytes(data_type, &bytes)
    }

    /// Writes `value` in place at `byte_offset`.
    ///
    /// Bit values are read-modify-written so the other seven bits of the byte
    /// are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Decode`] if the value does not fit in the
    /// buffer or the bit offset is invalid for the type.
    pub fn patch(
        &self,
        buffer: &mut [u8],
        byte_offset: usize,
        bit_offset: u8,
        value: Value,
    ) -> Result<()> {
        let data_type = value.data_type();
        Self::check_bit(data_type, bit_offset)?;
        let width = data_type.whole_bytes();
        Self::check_bounds(buffer.len(), byte_offset, width)?;

        if let Value::Bool(state) = value {
            let position = self.endian.bit_position(bit_offset);
            buffer[byte_offset] = set_bit(buffer[byte_offset], position, state);
            return Ok(());
        }

        let mut bytes = value.to_be_bytes();
        self.endian.arrange(&mut bytes);
        buffer[byte_offset..byte_offset + width].copy_from_slice(&bytes);
        Ok(())
    }

    /// Splits a flat buffer into `count` consecutive values of `data_type`.
    ///
    /// Bits are taken eight per byte in this codec's bit order.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Decode`] if the buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::{DataType, Endian, Value, ValueCodec};
    ///
    /// let codec = ValueCodec::new(Endian::LittleEndianLsb);
    /// let values = codec.to_typed_array(&[0x01, 0x00, 0xFF, 0xFF], DataType::I16, 2).unwrap();
    /// assert_eq!(values, vec![Value::I16(1), Value::I16(-1)]);
    /// ```
    pub fn to_typed_array(
        &self,
        buffer: &[u8],
        data_type: DataType,
        count: usize,
    ) -> Result<Vec<Value>> {
        if data_type.is_bit() {
            Self::check_bounds(buffer.len(), 0, count.div_ceil(8))?;
            let values = buffer
                .iter()
                .flat_map(|&byte| {
                    let bits = byte_to_bits(byte);
                    (0..8u8).map(move |bit| Value::Bool(bits[self.endian.bit_position(bit) as usize]))
                })
                .take(count)
                .collect();
            return Ok(values);
        }

        let width = data_type.whole_bytes();
        Self::check_bounds(buffer.len(), 0, width * count)?;
        (0..count)
            .map(|i| self.extract(buffer, i * width, 0, data_type))
            .collect()
    }
}
