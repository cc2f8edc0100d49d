//! # PLC Register Access Library
//!
//! A Rust library for reading and writing the registers of industrial devices
//! by key, on top of any byte-level transport (Modbus TCP/RTU, FINS, ...).
//!
//! This is a **register-layer** library: it decides *which* bytes to move and
//! *how* to interpret them, never how they travel. The wire protocol lives
//! behind the [`Transport`] trait.
//!
//! ## Features
//!
//! - **Address batching** - logical registers are combined into the fewest wire requests
//! - **Gap bridging** - optional jump combination trades a few unused bytes for fewer round trips
//! - **Endian-aware codec** - byte order, word order and bit numbering per device
//! - **Bit registers** - read-modify-write at bit granularity, neighbours preserved
//! - **Circuit breaker** - forced disconnect after repeated failures
//! - **No panics** - all errors returned as `Result<T, RegisterError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use plc_registers::{AddressUnit, DataType, DeviceSession, KeyKind, SessionConfig, Transport};
//!
//! async fn poll(transport: impl Transport) -> plc_registers::Result<()> {
//!     let units = vec![
//!         AddressUnit::new("level".to_string(), "4X", 100, DataType::U16)
//!             .with_zoom(0.01)
//!             .with_tag("TANK_LEVEL"),
//!         AddressUnit::new("pump".to_string(), "0X", 5, DataType::Bool).with_tag("PUMP_ON"),
//!     ];
//!     let mut session = DeviceSession::modbus(SessionConfig::new("tank-1"), transport, units)?;
//!
//!     // Read every register, keyed by communication tag
//!     if let Some(values) = session.read(KeyKind::CommunicationTag).await? {
//!         println!("level = {:?}", values["TANK_LEVEL"]);
//!     }
//!
//!     // Switch the pump on
//!     let report = session
//!         .write(KeyKind::CommunicationTag, &HashMap::from([("PUMP_ON".to_string(), 1.0)]))
//!         .await?;
//!     for skipped in &report.skipped {
//!         println!("skipped: {skipped}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Address Combination
//!
//! | Combiner | Use when |
//! |----------|----------|
//! | [`SingleCombiner`] | the transport gains nothing from batching |
//! | [`ContinuousCombiner`] | default; touching registers share one request |
//! | [`NumericJumpCombiner`] | round trips are expensive and small gaps are cheap |
//!
//! ```
//! use std::sync::Arc;
//! use plc_registers::{AddressCombiner, AddressUnit, DataType, ModbusAddressTranslator, NumericJumpCombiner};
//!
//! let combiner = NumericJumpCombiner::new(Arc::new(ModbusAddressTranslator), 100, 4).unwrap();
//! let units: Vec<AddressUnit> = [2, 3, 4, 6, 8]
//!     .into_iter()
//!     .map(|a| AddressUnit::new(format!("r{a}"), "4X", a, DataType::U16))
//!     .collect();
//!
//! let blocks = combiner.combine(&units).unwrap();
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].byte_count, 14);
//! ```
//!
//! ## Utility Functions
//!
//! The [`utils`] module provides byte-level bit helpers and hex formatting,
//! and [`coordinate`] the protocol coordinate arithmetic used by the
//! combiners:
//!
//! ```
//! use plc_registers::coordinate::coordinate;
//! use plc_registers::utils::{format_hex, set_bit};
//!
//! assert_eq!(set_bit(0x00, 3, true), 0x08);
//! assert_eq!(format_hex(&[0x01, 0xFF]), "01 FF");
//!
//! // Bit 4 of holding register 10 sits a quarter of the way into the register.
//! assert_eq!(coordinate(10, 4, 2.0), 10.25);
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, RegisterError>`]. Callers usually branch
//! on [`RegisterError::kind`]:
//!
//! ```no_run
//! use plc_registers::{DeviceSession, ErrorKind, KeyKind, Transport};
//!
//! # async fn run(session: &mut DeviceSession<impl Transport>) {
//! match session.read(KeyKind::Name).await {
//!     Ok(Some(values)) => println!("{} values", values.len()),
//!     Ok(None) => println!("device answered nothing"),
//!     Err(e) if e.kind() == ErrorKind::Connection => println!("offline: {e}"),
//!     Err(e) => println!("read aborted: {e}"),
//! }
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```
//! use plc_registers::{CombinerKind, Endian, SessionConfig};
//!
//! let config = SessionConfig::new("line-2")
//!     .with_keep_connect(true)                    // Keep the link open (default: off)
//!     .with_endian(Endian::WordSwappedLsb)        // Word order (default: big-endian)
//!     .with_max_error_count(5)                    // Circuit breaker (default: 3)
//!     .with_read_combiner(CombinerKind::NumericJump {
//!         max_length: 120,
//!         jump_byte_count: 10,
//!     });
//! ```
//!
//! ## Shared Links
//!
//! Several sessions on one serial line share the physical port through a
//! [`LinkRegistry`]. Give each session a [`SharedTransport`] on the same link:
//! the port is opened on first connect, access is exclusive per send/receive
//! cycle, and the port closes when the last session disconnects.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod codec;
mod combiner;
pub mod coordinate;
mod data_type;
mod error;
mod link;
mod session;
mod translator;
mod transport;
mod unit;
pub mod utils;

pub use codec::{Endian, Value, ValueCodec};
pub use combiner::{
    AddressCombiner, CombinerKind, ContinuousCombiner, NumericJumpCombiner, SingleCombiner,
    DEFAULT_MAX_LENGTH,
};
pub use data_type::DataType;
pub use error::{ErrorKind, RegisterError, Result};
pub use link::{LinkHandle, LinkRegistry, SharedTransport};
pub use session::{
    DeviceSession, ReadValues, SessionConfig, WriteReport, DEFAULT_MAX_ERROR_COUNT,
};
pub use translator::{
    AddressDef, AddressFormatter, AddressTranslator, BaseAddressFormatter, BaseAddressTranslator,
    ModbusAddressFormatter, ModbusAddressTranslator,
};
pub use transport::Transport;
pub use unit::{AddressUnit, CommunicationUnit, KeyKind};
