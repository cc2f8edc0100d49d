//! Utility functions for bit manipulation and buffer formatting.
//!
//! These helpers work on single bytes, the granularity at which
//! [`ValueCodec`](crate::ValueCodec) reads and patches bit registers.
//!
//! # Example
//!
//! ```
//! use plc_registers::utils::{byte_to_bits, format_hex, get_bit, set_bit};
//!
//! let value: u8 = 0b1010_0101;
//!
//! assert!(get_bit(value, 0));
//! assert!(!get_bit(value, 1));
//!
//! let modified = set_bit(value, 1, true);
//! assert_eq!(modified, 0b1010_0111);
//!
//! let bits = byte_to_bits(value);
//! assert!(bits[7]);
//!
//! assert_eq!(format_hex(&[0x12, 0xAB]), "12 AB");
//! ```

/// Gets a single bit from a byte.
///
/// # Arguments
///
/// * `value` - The byte to extract from
/// * `bit` - Bit position (0-7, where 0 is LSB)
#[inline]
pub fn get_bit(value: u8, bit: u8) -> bool {
    (value & (1 << bit)) != 0
}

/// Sets or clears a single bit in a byte, leaving every other bit untouched.
///
/// # Arguments
///
/// * `value` - The original byte
/// * `bit` - Bit position (0-7, where 0 is LSB)
/// * `state` - Value to set (true = ON, false = OFF)
///
/// # Example
///
/// ```
/// use plc_registers::utils::set_bit;
///
/// assert_eq!(set_bit(0, 5, true), 0b0010_0000);
/// assert_eq!(set_bit(0xFF, 0, false), 0xFE);
/// ```
#[inline]
pub fn set_bit(value: u8, bit: u8, state: bool) -> u8 {
    if state {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

/// Converts a byte to an array of 8 booleans, index 0 being the LSB.
pub fn byte_to_bits(value: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = get_bit(value, i as u8);
    }
    bits
}

/// Formats a buffer as space separated upper-case hex bytes.
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
