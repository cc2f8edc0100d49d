//! Address translation and formatting.
//!
//! An [`AddressTranslator`] knows the per-address byte width of every area of
//! a protocol and parses textual addresses. An [`AddressFormatter`] produces
//! the canonical textual form that translators parse back.
//!
//! Two variants are provided:
//!
//! - [`BaseAddressTranslator`] / [`BaseAddressFormatter`] - placeholder for
//!   protocols without area distinction: `"<area>:<address>[:<sub>]"`, every
//!   area one byte wide.
//! - [`ModbusAddressTranslator`] / [`ModbusAddressFormatter`] - Modbus data
//!   model: `"<area> <address>[.<sub>]"` with areas `0X`, `1X`, `3X`, `4X`.
//!
//! # Modbus Areas
//!
//! | Area | Description | Width (bytes) | Read FC | Write FC |
//! |------|-------------|:-------------:|:-------:|:--------:|
//! | 0X | Coils | 0.125 | 1 | 15 |
//! | 1X | Discrete inputs | 0.125 | 2 | - |
//! | 3X | Input registers | 2 | 4 | - |
//! | 4X | Holding registers | 2 | 3 | 16 |
//!
//! # Example
//!
//! ```
//! use plc_registers::{AddressFormatter, AddressTranslator, ModbusAddressFormatter, ModbusAddressTranslator};
//!
//! let translator = ModbusAddressTranslator;
//! let def = translator.parse("4x 12.3").unwrap();
//! assert_eq!(def.area, "4X");
//! assert_eq!(def.address, 12);
//! assert_eq!(def.sub_address, 3);
//! assert_eq!(translator.byte_width("4X").unwrap(), 2.0);
//!
//! let formatter = ModbusAddressFormatter;
//! assert_eq!(formatter.format_bit_address("4X", 12, 3), "4X 12.3");
//! ```

use crate::error::{RegisterError, Result};

/// Structured form of a parsed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDef {
    /// Normalised area name.
    pub area: String,
    /// Address within the area.
    pub address: u32,
    /// Bit offset, 0 for whole-unit access.
    pub sub_address: u8,
    /// Protocol code used to read the area, if the protocol defines one.
    pub read_code: Option<u8>,
    /// Protocol code used to write the area; `None` for read-only areas.
    pub write_code: Option<u8>,
}

/// Converts areas to byte widths and parses textual addresses.
///
/// Implementations must be deterministic and side-effect free.
pub trait AddressTranslator: Send + Sync {
    /// Returns the number of bytes one address occupies in `area`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidAddress`] if the area is not recognised.
    fn byte_width(&self, area: &str) -> Result<f64>;

    /// Parses a textual address.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidAddress`] if the text is malformed or the
    /// area is not recognised.
    fn parse(&self, text: &str) -> Result<AddressDef>;
}

/// Produces canonical textual addresses.
pub trait AddressFormatter: Send + Sync {
    /// Formats a whole-unit address.
    fn format_address(&self, area: &str, address: u32) -> String;

    /// Formats an address including its bit offset.
    fn format_bit_address(&self, area: &str, address: u32, sub_address: u8) -> String;
}

fn parse_number<T: std::str::FromStr>(part: &str, text: &str) -> Result<T> {
    part.trim()
        .parse()
        .map_err(|_| RegisterError::invalid_address(text, format!("'{part}' is not a number")))
}

/// Translator for protocols without area distinction.
///
/// Accepts `"<area>:<address>"` or `"<area>:<address>:<sub>"` with numeric
/// components and reports a width of one byte for every area.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseAddressTranslator;

impl AddressTranslator for BaseAddressTranslator {
    fn byte_width(&self, _area: &str) -> Result<f64> {
        Ok(1.0)
    }

    fn parse(&self, text: &str) -> Result<AddressDef> {
        let parts: Vec<&str> = text.split(':').collect();
        let (area, address, sub) = match parts.as_slice() {
            [area, address] => (*area, *address, None),
            [area, address, sub] => (*area, *address, Some(*sub)),
            _ => {
                return Err(RegisterError::invalid_address(
                    text,
                    "expected <area>:<address>[:<sub>]",
                ))
            }
        };
        let area_code: u32 = parse_number(area, text)?;
        let address = parse_number(address, text)?;
        let sub_address = match sub {
            Some(sub) => parse_number(sub, text)?,
            None => 0,
        };
        Ok(AddressDef {
            area: area_code.to_string(),
            address,
            sub_address,
            read_code: None,
            write_code: None,
        })
    }
}

/// Formatter matching [`BaseAddressTranslator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseAddressFormatter;

impl AddressFormatter for BaseAddressFormatter {
    fn format_address(&self, area: &str, address: u32) -> String {
        format!("{area}:{address}")
    }

    fn format_bit_address(&self, area: &str, address: u32, sub_address: u8) -> String {
        format!("{area}:{address}:{sub_address}")
    }
}

/// Area properties of the Modbus data model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ModbusArea {
    width: f64,
    read_code: u8,
    write_code: Option<u8>,
}

fn modbus_area(area: &str) -> Option<ModbusArea> {
    match area.to_ascii_uppercase().as_str() {
        "0X" => Some(ModbusArea {
            width: 0.125,
            read_code: 0x01,
            write_code: Some(0x0F),
        }),
        "1X" => Some(ModbusArea {
            width: 0.125,
            read_code: 0x02,
            write_code: None,
        }),
        "3X" => Some(ModbusArea {
            width: 2.0,
            read_code: 0x04,
            write_code: None,
        }),
        "4X" => Some(ModbusArea {
            width: 2.0,
            read_code: 0x03,
            write_code: Some(0x10),
        }),
        _ => None,
    }
}

/// Translator for the Modbus data model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusAddressTranslator;

impl AddressTranslator for ModbusAddressTranslator {
    fn byte_width(&self, area: &str) -> Result<f64> {
        modbus_area(area)
            .map(|a| a.width)
            .ok_or_else(|| RegisterError::invalid_address(area, "unknown Modbus area"))
    }

    fn parse(&self, text: &str) -> Result<AddressDef> {
        let mut parts = text.split_whitespace();
        let (area, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(area), Some(rest), None) => (area, rest),
            _ => {
                return Err(RegisterError::invalid_address(
                    text,
                    "expected '<area> <address>[.<sub>]'",
                ))
            }
        };
        let props = modbus_area(area)
            .ok_or_else(|| RegisterError::invalid_address(text, "unknown Modbus area"))?;
        let (address, sub_address) = match rest.split_once('.') {
            Some((address, sub)) => (
                parse_number(address, text)?,
                parse_number(sub, text)?,
            ),
            None => (parse_number(rest, text)?, 0),
        };
        Ok(AddressDef {
            area: area.to_ascii_uppercase(),
            address,
            sub_address,
            read_code: Some(props.read_code),
            write_code: props.write_code,
        })
    }
}

/// Formatter matching [`ModbusAddressTranslator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusAddressFormatter;

impl AddressFormatter for ModbusAddressFormatter {
    fn format_address(&self, area: &str, address: u32) -> String {
        format!("{area} {address}")
    }

    fn format_bit_address(&self, area: &str, address: u32, sub_address: u8) -> String {
        format!("{area} {address}.{sub_address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_base_width_is_one() {
        let translator = BaseAddressTranslator;
        assert_eq!(translator.byte_width("anything").unwrap(), 1.0);
    }

    #[test]
    fn test_base_parse() {
        let translator = BaseAddressTranslator;
        let def = translator.parse("3:100").unwrap();
        assert_eq!(def.area, "3");
        assert_eq!(def.address, 100);
        assert_eq!(def.sub_address, 0);

        let def = translator.parse("3:100:5").unwrap();
        assert_eq!(def.sub_address, 5);
    }

    #[test]
    fn test_base_parse_malformed() {
        let translator = BaseAddressTranslator;
        for text in ["", "3", "a:1", "3:x", "1:2:3:4", "3:1:300"] {
            let err = translator.parse(text).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{text}");
        }
    }

    #[test]
    fn test_modbus_widths() {
        let translator = ModbusAddressTranslator;
        assert_eq!(translator.byte_width("0X").unwrap(), 0.125);
        assert_eq!(translator.byte_width("1x").unwrap(), 0.125);
        assert_eq!(translator.byte_width("3X").unwrap(), 2.0);
        assert_eq!(translator.byte_width("4X").unwrap(), 2.0);
        assert!(translator.byte_width("5X").is_err());
    }

    #[test]
    fn test_modbus_parse_codes() {
        let translator = ModbusAddressTranslator;
        let coil = translator.parse("0X 1").unwrap();
        assert_eq!(coil.read_code, Some(0x01));
        assert_eq!(coil.write_code, Some(0x0F));

        let input = translator.parse("3X 7").unwrap();
        assert_eq!(input.read_code, Some(0x04));
        assert_eq!(input.write_code, None);
    }

    #[test]
    fn test_modbus_parse_malformed() {
        let translator = ModbusAddressTranslator;
        for text in ["4X", "4X 1 2", "9X 1", "4X one", "4X 1.x", ""] {
            assert!(translator.parse(text).is_err(), "{text}");
        }
    }

    #[test]
    fn test_modbus_format_round_trip() {
        let translator = ModbusAddressTranslator;
        let formatter = ModbusAddressFormatter;
        for (area, address, sub) in [("0X", 1, 0), ("4X", 40, 9), ("3X", 0, 15)] {
            let text = formatter.format_bit_address(area, address, sub);
            let def = translator.parse(&text).unwrap();
            assert_eq!((def.area.as_str(), def.address, def.sub_address), (area, address, sub));
        }
        let def = translator.parse(&formatter.format_address("4X", 12)).unwrap();
        assert_eq!((def.address, def.sub_address), (12, 0));
    }

    #[test]
    fn test_base_format_round_trip() {
        let translator = BaseAddressTranslator;
        let formatter = BaseAddressFormatter;
        let def = translator
            .parse(&formatter.format_bit_address("2", 17, 4))
            .unwrap();
        assert_eq!((def.area.as_str(), def.address, def.sub_address), ("2", 17, 4));
    }
}
