//! Address combination.
//!
//! An [`AddressCombiner`] turns the unordered set of [`AddressUnit`]s of a
//! device into the ordered list of [`CommunicationUnit`]s that are actually
//! sent over the wire.
//!
//! | Combiner | Blocks produced |
//! |----------|-----------------|
//! | [`SingleCombiner`] | one request per address unit |
//! | [`ContinuousCombiner`] | one request per run of touching or overlapping units, capped at `max_length` bytes |
//! | [`NumericJumpCombiner`] | continuous blocks, then bridges the smallest gaps within a byte budget |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use plc_registers::{AddressCombiner, AddressUnit, ContinuousCombiner, DataType, ModbusAddressTranslator};
//!
//! let combiner = ContinuousCombiner::new(Arc::new(ModbusAddressTranslator), 100).unwrap();
//! let units: Vec<AddressUnit> = [4, 2, 3]
//!     .into_iter()
//!     .map(|a| AddressUnit::new(format!("r{a}"), "4X", a, DataType::U16))
//!     .collect();
//!
//! let blocks = combiner.combine(&units).unwrap();
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].address, 2);
//! assert_eq!(blocks[0].byte_count, 6);
//! ```

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coordinate::{coordinate, next_coordinate, span_bytes};
use crate::data_type::DataType;
use crate::error::{RegisterError, Result};
use crate::translator::AddressTranslator;
use crate::unit::{AddressUnit, CommunicationUnit};

/// Default maximum transfer size of one request, in bytes.
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// Batching strategy from logical address units to physical requests.
///
/// Every input unit appears in exactly one output block, and units inside a
/// block are ordered by protocol coordinate.
pub trait AddressCombiner<K = String>: Send + Sync {
    /// Combines `addresses` into communication units.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidAddress`] for an area the translator
    /// does not know, or [`RegisterError::InvalidParameter`] for a unit that
    /// alone exceeds the maximum transfer size.
    fn combine(&self, addresses: &[AddressUnit<K>]) -> Result<Vec<CommunicationUnit<K>>>;
}

/// One request per address unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleCombiner;

impl<K: Clone> AddressCombiner<K> for SingleCombiner {
    fn combine(&self, addresses: &[AddressUnit<K>]) -> Result<Vec<CommunicationUnit<K>>> {
        Ok(addresses
            .iter()
            .map(|unit| CommunicationUnit {
                area: unit.area.clone(),
                address: unit.address,
                sub_address: unit.sub_address,
                byte_count: unit.data_type.whole_bytes(),
                data_type: unit.data_type,
                original_addresses: vec![unit.clone()],
            })
            .collect())
    }
}

/// Block under construction during the sweep.
struct OpenBlock<K> {
    init: f64,
    end: f64,
    units: Vec<AddressUnit<K>>,
}

impl<K> OpenBlock<K> {
    fn start(unit: AddressUnit<K>, init: f64, end: f64) -> Self {
        Self {
            init,
            end,
            units: vec![unit],
        }
    }

    fn close(self, area: &str, width: f64) -> CommunicationUnit<K> {
        let start = self.init.floor();
        CommunicationUnit {
            area: area.to_string(),
            address: start as u32,
            sub_address: 0,
            byte_count: span_bytes(start, self.end, width),
            data_type: DataType::U8,
            original_addresses: self.units,
        }
    }
}

/// Merges touching and overlapping units of one area into contiguous blocks.
///
/// Units are grouped by area, ignoring case and in order of first
/// appearance, and swept in coordinate order. A new block starts when a unit begins beyond the end of
/// the current block, or when adding it would take the block past
/// `max_length` bytes. A unit fully covered by the current block is recorded
/// without extending it.
#[derive(Clone)]
pub struct ContinuousCombiner {
    translator: Arc<dyn AddressTranslator>,
    max_length: usize,
}

impl std::fmt::Debug for ContinuousCombiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousCombiner")
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}

impl ContinuousCombiner {
    /// Creates a continuous combiner.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidParameter`] if `max_length` is zero.
    pub fn new(translator: Arc<dyn AddressTranslator>, max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(RegisterError::invalid_parameter(
                "max_length",
                "must be at least 1 byte",
            ));
        }
        Ok(Self {
            translator,
            max_length,
        })
    }

    /// Returns the maximum transfer size in bytes.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn combine_area<K: Clone>(
        &self,
        area: &str,
        units: Vec<&AddressUnit<K>>,
        out: &mut Vec<CommunicationUnit<K>>,
    ) -> Result<()> {
        let width = self.translator.byte_width(area)?;
        let mut ranked: Vec<(f64, &AddressUnit<K>)> = units
            .into_iter()
            .map(|unit| (coordinate(unit.address, unit.sub_address, width), unit))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut open: Option<OpenBlock<K>> = None;
        for (coord, unit) in ranked {
            let end = next_coordinate(coord, unit.data_type, width);
            if span_bytes(coord.floor(), end, width) > self.max_length {
                return Err(RegisterError::invalid_parameter(
                    "max_length",
                    format!(
                        "{} at {area} {}.{} does not fit in {} bytes",
                        unit.data_type, unit.address, unit.sub_address, self.max_length
                    ),
                ));
            }

            open = Some(match open.take() {
                None => OpenBlock::start(unit.clone(), coord, end),
                Some(mut block) => {
                    let extended = block.end.max(end);
                    let fits = span_bytes(block.init.floor(), extended, width) <= self.max_length;
                    if coord > block.end || !fits {
                        out.push(block.close(area, width));
                        OpenBlock::start(unit.clone(), coord, end)
                    } else {
                        block.end = extended;
                        block.units.push(unit.clone());
                        block
                    }
                }
            });
        }
        if let Some(block) = open {
            out.push(block.close(area, width));
        }
        Ok(())
    }
}

impl<K: Clone> AddressCombiner<K> for ContinuousCombiner {
    fn combine(&self, addresses: &[AddressUnit<K>]) -> Result<Vec<CommunicationUnit<K>>> {
        // Area names are case-insensitive; blocks carry the upper-case spelling.
        let mut groups: Vec<(String, Vec<&AddressUnit<K>>)> = Vec::new();
        for unit in addresses {
            let area = unit.area.to_ascii_uppercase();
            match groups.iter_mut().find(|(name, _)| *name == area) {
                Some((_, members)) => members.push(unit),
                None => groups.push((area, vec![unit])),
            }
        }

        let mut blocks = Vec::new();
        for (area, units) in groups {
            self.combine_area(&area, units, &mut blocks)?;
        }
        Ok(blocks)
    }
}

/// Continuous combination followed by gap bridging.
///
/// Gaps between adjacent blocks of the same area are bridged smallest first
/// while the merged block stays within `max_length` bytes. Every bridged gap
/// is paid for from `jump_byte_count`; merging stops for good once the
/// budget would go negative.
#[derive(Debug, Clone)]
pub struct NumericJumpCombiner {
    continuous: ContinuousCombiner,
    jump_byte_count: usize,
}

impl NumericJumpCombiner {
    /// Creates a gap-bridging combiner.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidParameter`] if `max_length` is zero.
    pub fn new(
        translator: Arc<dyn AddressTranslator>,
        max_length: usize,
        jump_byte_count: usize,
    ) -> Result<Self> {
        Ok(Self {
            continuous: ContinuousCombiner::new(translator, max_length)?,
            jump_byte_count,
        })
    }

    /// Returns the total number of unused bytes that may be bridged.
    pub fn jump_byte_count(&self) -> usize {
        self.jump_byte_count
    }
}

impl<K: Clone> AddressCombiner<K> for NumericJumpCombiner {
    fn combine(&self, addresses: &[AddressUnit<K>]) -> Result<Vec<CommunicationUnit<K>>> {
        let blocks = self.continuous.combine(addresses)?;

        // (gap bytes, index of the block right of the gap)
        let mut gaps: Vec<(usize, usize)> = Vec::new();
        for (index, pair) in blocks.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.area != next.area {
                continue;
            }
            let width = self.continuous.translator.byte_width(&next.area)?;
            let distance = (f64::from(next.address) - f64::from(prev.address)) * width;
            let gap = (distance - prev.byte_count as f64).ceil();
            if gap > 0.0 {
                gaps.push((gap as usize, index + 1));
            }
        }
        gaps.sort_by_key(|&(gap, _)| gap);

        let max_length = self.continuous.max_length;
        let mut budget = self.jump_byte_count as isize;
        let mut slots: Vec<Option<CommunicationUnit<K>>> = blocks.into_iter().map(Some).collect();

        for (gap, next_index) in gaps {
            let Some(prev_index) = (0..next_index).rev().find(|&i| slots[i].is_some()) else {
                continue;
            };
            let merged_len = match (&slots[prev_index], &slots[next_index]) {
                (Some(prev), Some(next)) => prev.byte_count + gap + next.byte_count,
                _ => continue,
            };
            if merged_len > max_length {
                continue;
            }
            budget -= gap as isize;
            if budget < 0 {
                tracing::trace!(gap, "jump budget exhausted");
                break;
            }
            if let (Some(next), Some(prev)) = (slots[next_index].take(), slots[prev_index].as_mut()) {
                prev.byte_count = merged_len;
                prev.original_addresses.extend(next.original_addresses);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Declarative choice of combiner, used by [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum CombinerKind {
    /// [`SingleCombiner`].
    Single,
    /// [`ContinuousCombiner`].
    Continuous {
        /// Maximum transfer size in bytes.
        max_length: usize,
    },
    /// [`NumericJumpCombiner`].
    NumericJump {
        /// Maximum transfer size in bytes.
        max_length: usize,
        /// Total number of unused bytes that may be bridged.
        jump_byte_count: usize,
    },
}

impl Default for CombinerKind {
    fn default() -> Self {
        CombinerKind::Continuous {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl CombinerKind {
    /// Builds the combiner described by this kind.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidParameter`] if `max_length` is zero.
    pub fn build<K: Clone + 'static>(
        self,
        translator: Arc<dyn AddressTranslator>,
    ) -> Result<Box<dyn AddressCombiner<K>>> {
        let combiner: Box<dyn AddressCombiner<K>> = match self {
            CombinerKind::Single => Box::new(SingleCombiner),
            CombinerKind::Continuous { max_length } => {
                Box::new(ContinuousCombiner::new(translator, max_length)?)
            }
            CombinerKind::NumericJump {
                max_length,
                jump_byte_count,
            } => Box::new(NumericJumpCombiner::new(
                translator,
                max_length,
                jump_byte_count,
            )?),
        };
        Ok(combiner)
    }
}
