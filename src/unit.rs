//! Logical and physical register descriptions.
//!
//! An [`AddressUnit`] describes one logical register the caller cares about.
//! A [`CommunicationUnit`] is one contiguous request produced by an
//! [`AddressCombiner`](crate::AddressCombiner) that satisfies one or more
//! address units at once.
//!
//! # Example
//!
//! ```
//! use plc_registers::{AddressUnit, DataType};
//!
//! let speed = AddressUnit::new("speed".to_string(), "4X", 2, DataType::U16)
//!     .with_zoom(0.1)
//!     .with_name("Motor speed")
//!     .with_tag("M1_SPD");
//! assert!(speed.can_write);
//!
//! let alarm = AddressUnit::new("alarm".to_string(), "0X", 1, DataType::Bool)
//!     .with_sub_address(3)
//!     .read_only();
//! assert!(!alarm.can_write);
//! ```

use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::translator::AddressFormatter;

/// Which property of an [`AddressUnit`] keys read results and write requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum KeyKind {
    /// The formatted address string, e.g. `"4X 1.0"`.
    Address,
    /// The communication tag.
    #[default]
    CommunicationTag,
    /// The display name.
    Name,
    /// The id, converted to a string.
    Id,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Address => write!(f, "address"),
            KeyKind::CommunicationTag => write!(f, "communication_tag"),
            KeyKind::Name => write!(f, "name"),
            KeyKind::Id => write!(f, "id"),
        }
    }
}

/// One logical register on a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AddressUnit<K = String> {
    /// Caller-chosen identifier, unique within one device.
    pub id: K,
    /// Protocol-defined memory area name.
    pub area: String,
    /// Address within the area.
    pub address: u32,
    /// Bit offset within the addressed unit, 0 for whole-unit access.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sub_address: u8,
    /// Native type of the register.
    pub data_type: DataType,
    /// Scale applied on read (multiplied) and write (divided).
    #[cfg_attr(feature = "serde", serde(default = "default_zoom"))]
    pub zoom: f64,
    /// Whether writes to this register are allowed.
    #[cfg_attr(feature = "serde", serde(default = "default_can_write"))]
    pub can_write: bool,
    /// Communication tag lookup key.
    #[cfg_attr(feature = "serde", serde(default))]
    pub communication_tag: String,
    /// Display name lookup key.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
}

#[cfg(feature = "serde")]
fn default_zoom() -> f64 {
    1.0
}

#[cfg(feature = "serde")]
fn default_can_write() -> bool {
    true
}

impl<K> AddressUnit<K> {
    /// Creates a writable, unscaled unit with empty name and tag.
    pub fn new(id: K, area: impl Into<String>, address: u32, data_type: DataType) -> Self {
        Self {
            id,
            area: area.into(),
            address,
            sub_address: 0,
            data_type,
            zoom: 1.0,
            can_write: true,
            communication_tag: String::new(),
            name: String::new(),
        }
    }

    /// Sets the bit offset within the addressed unit.
    pub fn with_sub_address(mut self, sub_address: u8) -> Self {
        self.sub_address = sub_address;
        self
    }

    /// Sets the scale factor.
    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the communication tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.communication_tag = tag.into();
        self
    }

    /// Marks the unit as read-only.
    pub fn read_only(mut self) -> Self {
        self.can_write = false;
        self
    }
}

impl<K: Display> AddressUnit<K> {
    /// Returns the lookup key of this unit for the given [`KeyKind`].
    ///
    /// Address keys always carry the bit offset, e.g. `"4X 1.0"`.
    pub fn key(&self, kind: KeyKind, formatter: &dyn AddressFormatter) -> String {
        match kind {
            KeyKind::Address => {
                formatter.format_bit_address(&self.area, self.address, self.sub_address)
            }
            KeyKind::CommunicationTag => self.communication_tag.clone(),
            KeyKind::Name => self.name.clone(),
            KeyKind::Id => self.id.to_string(),
        }
    }

    /// Returns whether `key` designates this unit under the given [`KeyKind`].
    ///
    /// For address keys, non-bit units also match the short form without a
    /// bit offset (`"4X 1"`).
    pub fn matches_key(&self, kind: KeyKind, key: &str, formatter: &dyn AddressFormatter) -> bool {
        if self.key(kind, formatter) == key {
            return true;
        }
        kind == KeyKind::Address
            && !self.data_type.is_bit()
            && formatter.format_address(&self.area, self.address) == key
    }
}

/// One physical contiguous request produced by combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationUnit<K = String> {
    /// Memory area of the block.
    pub area: String,
    /// Start address of the block.
    pub address: u32,
    /// Bit offset of the block start, 0 for combined blocks.
    pub sub_address: u8,
    /// Number of bytes transferred for this block.
    pub byte_count: usize,
    /// Transfer type of the block; combined blocks are raw bytes.
    pub data_type: DataType,
    /// The logical units this block satisfies, ordered by protocol coordinate.
    pub original_addresses: Vec<AddressUnit<K>>,
}

impl<K> CommunicationUnit<K> {
    /// Returns the formatted start address used for fetch and store.
    pub fn start_address(&self, formatter: &dyn AddressFormatter) -> String {
        if self.sub_address == 0 {
            formatter.format_address(&self.area, self.address)
        } else {
            formatter.format_bit_address(&self.area, self.address, self.sub_address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::ModbusAddressFormatter;

    #[test]
    fn test_new_defaults() {
        let unit = AddressUnit::new(7u32, "4X", 10, DataType::I16);
        assert_eq!(unit.id, 7);
        assert_eq!(unit.sub_address, 0);
        assert_eq!(unit.zoom, 1.0);
        assert!(unit.can_write);
        assert!(unit.name.is_empty());
    }

    #[test]
    fn test_keys() {
        let formatter = ModbusAddressFormatter;
        let unit = AddressUnit::new(3u32, "4X", 1, DataType::U16)
            .with_name("Pressure")
            .with_tag("P1");
        assert_eq!(unit.key(KeyKind::Address, &formatter), "4X 1.0");
        assert_eq!(unit.key(KeyKind::Name, &formatter), "Pressure");
        assert_eq!(unit.key(KeyKind::CommunicationTag, &formatter), "P1");
        assert_eq!(unit.key(KeyKind::Id, &formatter), "3");
    }

    #[test]
    fn test_short_address_key_matches_words_only() {
        let formatter = ModbusAddressFormatter;
        let word = AddressUnit::new(1u32, "4X", 1, DataType::U16);
        assert!(word.matches_key(KeyKind::Address, "4X 1", &formatter));
        assert!(word.matches_key(KeyKind::Address, "4X 1.0", &formatter));

        let bit = AddressUnit::new(2u32, "0X", 1, DataType::Bool);
        assert!(!bit.matches_key(KeyKind::Address, "0X 1", &formatter));
        assert!(bit.matches_key(KeyKind::Address, "0X 1.0", &formatter));
    }

    #[test]
    fn test_start_address() {
        let formatter = ModbusAddressFormatter;
        let block: CommunicationUnit<String> = CommunicationUnit {
            area: "4X".into(),
            address: 2,
            sub_address: 0,
            byte_count: 6,
            data_type: DataType::U8,
            original_addresses: Vec::new(),
        };
        assert_eq!(block.start_address(&formatter), "4X 2");

        let bit_block = CommunicationUnit {
            sub_address: 3,
            ..block
        };
        assert_eq!(bit_block.start_address(&formatter), "4X 2.3");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"id":"a","area":"4X","address":5,"data_type":"u16"}"#;
        let unit: AddressUnit = serde_json::from_str(json).unwrap();
        assert_eq!(unit.zoom, 1.0);
        assert!(unit.can_write);
        assert_eq!(unit.sub_address, 0);
    }
}
