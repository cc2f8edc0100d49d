//! Device sessions.
//!
//! This module provides [`DeviceSession`], the primary interface for reading
//! and writing the registers of one device by key.
//!
//! # Overview
//!
//! A session ties together:
//! - The device's [`AddressUnit`] table
//! - Read and write [`AddressCombiner`]s that batch units into requests
//! - A [`ValueCodec`] that extracts and patches typed values
//! - A [`Transport`] that moves the raw bytes
//!
//! and owns the connection policy: auto-connect, optional disconnect after
//! every call, and a circuit breaker that forces a disconnect after
//! `max_error_count` consecutive failures.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use plc_registers::{AddressUnit, DataType, DeviceSession, KeyKind, SessionConfig, Transport};
//!
//! # async fn run(transport: impl Transport) -> plc_registers::Result<()> {
//! let units = vec![
//!     AddressUnit::new("speed".to_string(), "4X", 1, DataType::U16)
//!         .with_zoom(0.1)
//!         .with_tag("SPD"),
//!     AddressUnit::new("running".to_string(), "0X", 1, DataType::Bool)
//!         .with_tag("RUN")
//!         .read_only(),
//! ];
//! let config = SessionConfig::new("press-3").with_keep_connect(true);
//! let mut session = DeviceSession::modbus(config, transport, units)?;
//!
//! if let Some(values) = session.read(KeyKind::CommunicationTag).await? {
//!     println!("speed = {:?}", values["SPD"]);
//! }
//!
//! let report = session
//!     .write(KeyKind::CommunicationTag, &HashMap::from([("SPD".to_string(), 42.5)]))
//!     .await?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! # Failure Handling
//!
//! Key resolution failures in [`DeviceSession::write`] skip the key and are
//! listed in the [`WriteReport`]. Every other failure aborts the call,
//! increments the error count and is returned as an error. Blocks already
//! stored by an aborted write are not rolled back.
//!
//! A session must not be used from several tasks at once; it takes
//! `&mut self` for all I/O.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec::{Endian, Value, ValueCodec};
use crate::combiner::{AddressCombiner, CombinerKind};
use crate::coordinate::{byte_offset, coordinate, split_byte_offset};
use crate::error::{RegisterError, Result};
use crate::translator::{
    AddressFormatter, AddressTranslator, ModbusAddressFormatter, ModbusAddressTranslator,
};
use crate::transport::Transport;
use crate::unit::{AddressUnit, CommunicationUnit, KeyKind};
use crate::utils::format_hex;

/// Consecutive failures after which a session forces a disconnect.
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// Values read from a device, keyed by the requested [`KeyKind`].
///
/// `None` marks an address the device reported as not present.
pub type ReadValues = HashMap<String, Option<f64>>;

/// Outcome of a successful [`DeviceSession::write`].
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Keys written, in the order their blocks were stored.
    pub written: Vec<String>,
    /// Keys skipped, each with its [`RegisterError::KeyResolution`] error.
    pub skipped: Vec<RegisterError>,
}

impl WriteReport {
    /// Returns `true` if no key was skipped.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Configuration for creating a device session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Session identity used in logs.
    pub id: String,
    /// Keep the link open between calls.
    #[cfg_attr(feature = "serde", serde(default))]
    pub keep_connect: bool,
    /// Byte and bit order of the device.
    #[cfg_attr(feature = "serde", serde(default))]
    pub endian: Endian,
    /// Consecutive failures before a forced disconnect.
    #[cfg_attr(feature = "serde", serde(default = "default_max_error_count"))]
    pub max_error_count: u32,
    /// Combiner used for reads.
    #[cfg_attr(feature = "serde", serde(default))]
    pub read_combiner: CombinerKind,
    /// Combiner used for writes.
    #[cfg_attr(feature = "serde", serde(default))]
    pub write_combiner: CombinerKind,
}

#[cfg(feature = "serde")]
fn default_max_error_count() -> u32 {
    DEFAULT_MAX_ERROR_COUNT
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    ///
    /// Defaults: keep-connect off, [`Endian::BigEndianLsb`], continuous
    /// combination capped at 100 bytes for reads and writes, and a circuit
    /// breaker after [`DEFAULT_MAX_ERROR_COUNT`] failures.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::SessionConfig;
    ///
    /// let config = SessionConfig::new("boiler-1");
    /// assert!(!config.keep_connect);
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keep_connect: false,
            endian: Endian::default(),
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
            read_combiner: CombinerKind::default(),
            write_combiner: CombinerKind::default(),
        }
    }

    /// Keeps the link open between calls (default is off).
    pub fn with_keep_connect(mut self, keep_connect: bool) -> Self {
        self.keep_connect = keep_connect;
        self
    }

    /// Sets the device endian (default is [`Endian::BigEndianLsb`]).
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Sets the circuit breaker threshold (default is 3).
    pub fn with_max_error_count(mut self, max_error_count: u32) -> Self {
        self.max_error_count = max_error_count;
        self
    }

    /// Sets the combiner used for reads.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::{CombinerKind, SessionConfig};
    ///
    /// let config = SessionConfig::new("boiler-1").with_read_combiner(CombinerKind::NumericJump {
    ///     max_length: 120,
    ///     jump_byte_count: 8,
    /// });
    /// ```
    pub fn with_read_combiner(mut self, kind: CombinerKind) -> Self {
        self.read_combiner = kind;
        self
    }

    /// Sets the combiner used for writes.
    pub fn with_write_combiner(mut self, kind: CombinerKind) -> Self {
        self.write_combiner = kind;
        self
    }
}

/// Key-addressed register access to one device.
pub struct DeviceSession<T, K = String> {
    id: String,
    transport: T,
    addresses: Vec<AddressUnit<K>>,
    translator: Arc<dyn AddressTranslator>,
    formatter: Arc<dyn AddressFormatter>,
    read_combiner: Box<dyn AddressCombiner<K>>,
    write_combiner: Box<dyn AddressCombiner<K>>,
    codec: ValueCodec,
    keep_connect: bool,
    error_count: u32,
    max_error_count: u32,
}

/// Byte and bit position of `unit` inside the buffer fetched for `block`.
fn unit_offset<K>(
    block: &CommunicationUnit<K>,
    unit: &AddressUnit<K>,
    width: f64,
) -> Result<(usize, u8)> {
    let start = coordinate(block.address, block.sub_address, width);
    let at = coordinate(unit.address, unit.sub_address, width);
    if at < start {
        return Err(RegisterError::decode(format!(
            "{} {}.{} lies before block start {} {}.{}",
            unit.area, unit.address, unit.sub_address, block.area, block.address, block.sub_address
        )));
    }
    Ok(split_byte_offset(byte_offset(at, start, width)))
}

/// Adds a read value, refusing to overwrite one already read under `key`.
fn insert_unique(
    values: &mut ReadValues,
    key: String,
    value: Option<f64>,
    key_kind: KeyKind,
) -> Result<()> {
    if values.contains_key(&key) {
        return Err(RegisterError::invalid_parameter(
            key_kind.to_string(),
            format!("'{key}' is shared by several addresses"),
        ));
    }
    values.insert(key, value);
    Ok(())
}

impl<T, K> DeviceSession<T, K>
where
    T: Transport,
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    /// Creates a session over `transport` for the given address table.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidParameter`] if a configured combiner
    /// cannot be built.
    pub fn new(
        config: SessionConfig,
        transport: T,
        addresses: Vec<AddressUnit<K>>,
        translator: Arc<dyn AddressTranslator>,
        formatter: Arc<dyn AddressFormatter>,
    ) -> Result<Self> {
        let read_combiner = config.read_combiner.build(Arc::clone(&translator))?;
        let write_combiner = config.write_combiner.build(Arc::clone(&translator))?;
        Ok(Self {
            id: config.id,
            transport,
            addresses,
            translator,
            formatter,
            read_combiner,
            write_combiner,
            codec: ValueCodec::new(config.endian),
            keep_connect: config.keep_connect,
            error_count: 0,
            max_error_count: config.max_error_count,
        })
    }

    /// Creates a session using the Modbus address translator and formatter.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::InvalidParameter`] if a configured combiner
    /// cannot be built.
    pub fn modbus(config: SessionConfig, transport: T, addresses: Vec<AddressUnit<K>>) -> Result<Self> {
        Self::new(
            config,
            transport,
            addresses,
            Arc::new(ModbusAddressTranslator),
            Arc::new(ModbusAddressFormatter),
        )
    }

    /// Replaces the read combiner with a custom strategy.
    pub fn with_read_combiner(mut self, combiner: Box<dyn AddressCombiner<K>>) -> Self {
        self.read_combiner = combiner;
        self
    }

    /// Replaces the write combiner with a custom strategy.
    pub fn with_write_combiner(mut self, combiner: Box<dyn AddressCombiner<K>>) -> Self {
        self.write_combiner = combiner;
        self
    }

    /// Returns the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the transport's connection token.
    pub fn connection_token(&self) -> String {
        self.transport.connection_token()
    }

    /// Returns `true` if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Returns whether the link stays open between calls.
    pub fn keep_connect(&self) -> bool {
        self.keep_connect
    }

    /// Sets whether the link stays open between calls.
    pub fn set_keep_connect(&mut self, keep_connect: bool) {
        self.keep_connect = keep_connect;
    }

    /// Returns the number of consecutive failed calls.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Returns the address table.
    pub fn addresses(&self) -> &[AddressUnit<K>] {
        &self.addresses
    }

    /// Replaces the address table.
    pub fn set_addresses(&mut self, addresses: Vec<AddressUnit<K>>) {
        self.addresses = addresses;
    }

    /// Returns the value codec.
    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the underlying transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Looks up an address unit by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::KeyResolution`] if several units share `id`.
    pub fn address_unit_by_id(&self, id: &K) -> Result<Option<&AddressUnit<K>>> {
        let mut matches = self.addresses.iter().filter(|unit| unit.id == *id);
        let first = matches.next();
        if matches.next().is_some() {
            return Err(RegisterError::key_resolution(
                id.to_string(),
                "id is shared by several addresses",
            ));
        }
        Ok(first)
    }

    /// Opens the link.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Connection`] if the transport cannot connect.
    pub async fn connect(&mut self) -> Result<()> {
        let token = self.transport.connection_token();
        match self.transport.connect().await {
            Ok(()) => {
                tracing::info!(session = %self.id, token = %token, "Connected");
                Ok(())
            }
            Err(err) => {
                tracing::error!(session = %self.id, token = %token, error = %err, "Connect failed");
                Err(match err {
                    err @ RegisterError::Connection { .. } => err,
                    other => RegisterError::connection(token, other.to_string()),
                })
            }
        }
    }

    /// Closes the link.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Connection`] if the transport cannot disconnect.
    pub async fn disconnect(&mut self) -> Result<()> {
        let token = self.transport.connection_token();
        match self.transport.disconnect().await {
            Ok(()) => {
                tracing::info!(session = %self.id, token = %token, "Disconnected");
                Ok(())
            }
            Err(err) => Err(match err {
                err @ RegisterError::Connection { .. } => err,
                other => RegisterError::connection(token, other.to_string()),
            }),
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        self.connect().await
    }

    async fn close_quietly(&mut self) {
        if !self.transport.is_connected() {
            return;
        }
        if let Err(err) = self.disconnect().await {
            tracing::warn!(session = %self.id, error = %err, "Disconnect failed");
        }
    }

    /// Applies error counting, the circuit breaker and the keep-connect policy.
    async fn settle<R>(&mut self, operation: &'static str, outcome: Result<R>) -> Result<R> {
        match &outcome {
            Ok(_) => self.error_count = 0,
            Err(err) => {
                self.error_count += 1;
                tracing::error!(
                    session = %self.id,
                    token = %self.transport.connection_token(),
                    error_count = self.error_count,
                    error = %err,
                    "{operation} aborted"
                );
                if self.error_count >= self.max_error_count {
                    tracing::warn!(
                        session = %self.id,
                        error_count = self.error_count,
                        "Error threshold reached, forcing disconnect"
                    );
                    self.close_quietly().await;
                }
            }
        }
        if !self.keep_connect {
            self.close_quietly().await;
        }
        outcome
    }

    /// Reads every address of the device.
    ///
    /// Returns `Ok(None)` if no address produced a value.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::Connection`] - the link could not be opened
    /// - [`RegisterError::Transport`] - a fetch failed or returned a short reply
    /// - [`RegisterError::Decode`] - a value could not be extracted
    /// - [`RegisterError::InvalidParameter`] - several addresses share a key
    /// - [`RegisterError::InvalidAddress`] / [`RegisterError::InvalidParameter`] -
    ///   the address table cannot be combined
    pub async fn read(&mut self, key_kind: KeyKind) -> Result<Option<ReadValues>> {
        self.ensure_connected().await?;
        let outcome = self.read_blocks(key_kind).await;
        self.settle("Read", outcome).await
    }

    async fn read_blocks(&mut self, key_kind: KeyKind) -> Result<Option<ReadValues>> {
        let blocks = self.read_combiner.combine(&self.addresses)?;
        let formatter = self.formatter.as_ref();
        let mut values = ReadValues::with_capacity(self.addresses.len());

        for block in &blocks {
            let address = block.start_address(formatter);
            let bytes = self.transport.fetch(&address, block.byte_count).await?;
            tracing::debug!(
                session = %self.id,
                area = %block.area,
                address = %address,
                byte_count = block.byte_count,
                payload = %format_hex(&bytes),
                "Fetched block"
            );

            if bytes.is_empty() {
                for unit in &block.original_addresses {
                    insert_unique(&mut values, unit.key(key_kind, formatter), None, key_kind)?;
                }
                continue;
            }
            if bytes.len() < block.byte_count {
                return Err(RegisterError::transport(
                    address,
                    format!("short reply: {} of {} bytes", bytes.len(), block.byte_count),
                ));
            }

            let width = self.translator.byte_width(&block.area)?;
            for unit in &block.original_addresses {
                let (byte, bit) = unit_offset(block, unit, width)?;
                let raw = self.codec.extract(&bytes, byte, bit, unit.data_type)?;
                let value = Some(raw.to_f64() * unit.zoom);
                insert_unique(&mut values, unit.key(key_kind, formatter), value, key_kind)?;
            }
        }

        if values.values().all(Option::is_none) {
            return Ok(None);
        }
        Ok(Some(values))
    }

    fn resolve_write_key(&self, key_kind: KeyKind, key: &str) -> Result<&AddressUnit<K>> {
        let formatter = self.formatter.as_ref();
        let mut matches = self
            .addresses
            .iter()
            .filter(|unit| unit.matches_key(key_kind, key, formatter));
        let unit = matches.next().ok_or_else(|| {
            RegisterError::key_resolution(key, format!("no address with this {key_kind}"))
        })?;
        if matches.next().is_some() {
            return Err(RegisterError::key_resolution(
                key,
                format!("{key_kind} is shared by several addresses"),
            ));
        }
        if !unit.can_write {
            return Err(RegisterError::key_resolution(key, "address is read-only"));
        }
        Ok(unit)
    }

    /// Writes `values` to the device, keyed by `key_kind`.
    ///
    /// Every touched block is fetched first so that bits and bytes not being
    /// written keep their current state, then patched and stored back.
    /// Values are divided by the unit's zoom and rounded to its native type.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::Connection`] - the link could not be opened
    /// - [`RegisterError::Transport`] - a fetch or store failed, or the fetch was short
    /// - [`RegisterError::Decode`] - a value does not fit its native type
    pub async fn write(
        &mut self,
        key_kind: KeyKind,
        values: &HashMap<String, f64>,
    ) -> Result<WriteReport> {
        self.ensure_connected().await?;
        let outcome = self.write_blocks(key_kind, values).await;
        self.settle("Write", outcome).await
    }

    async fn write_blocks(
        &mut self,
        key_kind: KeyKind,
        values: &HashMap<String, f64>,
    ) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        let mut pending: HashMap<String, f64> = HashMap::with_capacity(values.len());
        let mut targets: Vec<AddressUnit<K>> = Vec::new();

        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        for key in keys {
            match self.resolve_write_key(key_kind, key) {
                Ok(unit) => {
                    let canonical = unit.key(key_kind, self.formatter.as_ref());
                    if pending.insert(canonical, values[key]).is_none() {
                        targets.push(unit.clone());
                    }
                }
                Err(err) => {
                    tracing::warn!(session = %self.id, key = %key, reason = %err, "Skipping write key");
                    report.skipped.push(err);
                }
            }
        }
        if targets.is_empty() {
            return Ok(report);
        }

        let blocks = self.write_combiner.combine(&targets)?;
        let formatter = self.formatter.as_ref();
        for block in &blocks {
            let address = block.start_address(formatter);
            let mut buffer = self.transport.fetch(&address, block.byte_count).await?;
            if buffer.len() < block.byte_count {
                return Err(RegisterError::transport(
                    address,
                    format!(
                        "read-before-write returned {} of {} bytes",
                        buffer.len(),
                        block.byte_count
                    ),
                ));
            }
            buffer.truncate(block.byte_count);

            let width = self.translator.byte_width(&block.area)?;
            let mut keys = Vec::with_capacity(block.original_addresses.len());
            for unit in &block.original_addresses {
                let key = unit.key(key_kind, formatter);
                let Some(&value) = pending.get(&key) else {
                    continue;
                };
                let raw = Value::from_f64(unit.data_type, value / unit.zoom)?;
                let (byte, bit) = unit_offset(block, unit, width)?;
                self.codec.patch(&mut buffer, byte, bit, raw)?;
                keys.push(key);
            }

            tracing::debug!(
                session = %self.id,
                area = %block.area,
                address = %address,
                byte_count = block.byte_count,
                payload = %format_hex(&buffer),
                "Storing block"
            );
            self.transport.store(&address, &buffer).await?;
            report.written.extend(keys);
        }
        Ok(report)
    }
}

impl<T, K> std::fmt::Debug for DeviceSession<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("addresses", &self.addresses.len())
            .field("codec", &self.codec)
            .field("keep_connect", &self.keep_connect)
            .field("error_count", &self.error_count)
            .field("max_error_count", &self.max_error_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::SingleCombiner;
    use crate::data_type::DataType;
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Reply {
        Normal,
        Empty,
        Short,
    }

    /// In-memory device with a holding register image (4X) and a coil image (0X).
    struct MockTransport {
        connected: bool,
        refuse_connect: bool,
        reply: Reply,
        absent: Vec<String>,
        registers: Vec<u8>,
        coils: Vec<bool>,
        fetches: Vec<(String, usize)>,
        stores: Vec<(String, Vec<u8>)>,
        fail_store_at: Option<usize>,
        disconnects: usize,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                connected: false,
                refuse_connect: false,
                reply: Reply::Normal,
                absent: Vec::new(),
                registers: vec![0; 200],
                coils: vec![false; 64],
                fetches: Vec::new(),
                stores: Vec::new(),
                fail_store_at: None,
                disconnects: 0,
            }
        }

        fn set_register(&mut self, address: usize, value: u16) {
            self.registers[address * 2..address * 2 + 2].copy_from_slice(&value.to_be_bytes());
        }

        fn register(&self, address: usize) -> u16 {
            u16::from_be_bytes([self.registers[address * 2], self.registers[address * 2 + 1]])
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<()> {
            if self.refuse_connect {
                return Err(RegisterError::connection("mock:502", "connection refused"));
            }
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            self.disconnects += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn fetch(&mut self, address: &str, byte_count: usize) -> Result<Vec<u8>> {
            self.fetches.push((address.to_string(), byte_count));
            if !self.connected {
                return Err(RegisterError::transport(address, "not connected"));
            }
            if self.absent.iter().any(|a| a == address) {
                return Ok(Vec::new());
            }
            match self.reply {
                Reply::Empty => return Ok(Vec::new()),
                Reply::Short => return Ok(vec![0; byte_count.saturating_sub(1)]),
                Reply::Normal => {}
            }

            let def = ModbusAddressTranslator.parse(address)?;
            let start = def.address as usize;
            match def.area.as_str() {
                "4X" => Ok(self.registers[start * 2..start * 2 + byte_count].to_vec()),
                "0X" => Ok((0..byte_count)
                    .map(|i| {
                        (0..8).fold(0u8, |byte, bit| {
                            if self.coils[start + i * 8 + bit] {
                                byte | (1 << bit)
                            } else {
                                byte
                            }
                        })
                    })
                    .collect()),
                _ => Err(RegisterError::transport(address, "unsupported area")),
            }
        }

        async fn store(&mut self, address: &str, payload: &[u8]) -> Result<()> {
            self.stores.push((address.to_string(), payload.to_vec()));
            if self.fail_store_at == Some(self.stores.len()) {
                return Err(RegisterError::transport(address, "device rejected write"));
            }

            let def = ModbusAddressTranslator.parse(address)?;
            let start = def.address as usize;
            match def.area.as_str() {
                "4X" => {
                    self.registers[start * 2..start * 2 + payload.len()].copy_from_slice(payload);
                }
                "0X" => {
                    for (i, byte) in payload.iter().enumerate() {
                        for bit in 0..8 {
                            self.coils[start + i * 8 + bit] = byte & (1 << bit) != 0;
                        }
                    }
                }
                _ => return Err(RegisterError::transport(address, "unsupported area")),
            }
            Ok(())
        }

        fn connection_token(&self) -> String {
            "mock:502".to_string()
        }
    }

    fn plant_units() -> Vec<AddressUnit> {
        vec![
            AddressUnit::new("speed".to_string(), "4X", 2, DataType::U16)
                .with_zoom(0.1)
                .with_tag("SPD")
                .with_name("Speed"),
            AddressUnit::new("temp".to_string(), "4X", 3, DataType::I16)
                .with_tag("TMP")
                .with_name("Temperature"),
            AddressUnit::new("flag".to_string(), "4X", 4, DataType::Bool)
                .with_sub_address(1)
                .with_tag("FLG")
                .with_name("Flag"),
        ]
    }

    fn session(transport: MockTransport, units: Vec<AddressUnit>) -> DeviceSession<MockTransport> {
        DeviceSession::modbus(SessionConfig::new("plc-1"), transport, units).unwrap()
    }

    fn approx(value: Option<f64>, expected: f64) -> bool {
        value.is_some_and(|v| (v - expected).abs() < 1e-9)
    }

    #[tokio::test]
    async fn test_read_by_tag() {
        let mut transport = MockTransport::new();
        transport.set_register(2, 1000);
        transport.set_register(3, (-5i16) as u16);
        transport.registers[8] = 0b0000_0010;
        let mut session = session(transport, plant_units());

        let values = session.read(KeyKind::CommunicationTag).await.unwrap().unwrap();

        assert_eq!(values.len(), 3);
        assert!(approx(values["SPD"], 100.0));
        assert!(approx(values["TMP"], -5.0));
        assert!(approx(values["FLG"], 1.0));
        assert_eq!(
            session.transport().fetches,
            [("4X 2".to_string(), 4), ("4X 4".to_string(), 1)]
        );
        assert_eq!(session.error_count(), 0);
    }

    #[tokio::test]
    async fn test_read_by_address_and_name() {
        let mut transport = MockTransport::new();
        transport.set_register(3, 7);
        let mut session = session(transport, plant_units());
        session.set_keep_connect(true);

        let by_address = session.read(KeyKind::Address).await.unwrap().unwrap();
        assert!(approx(by_address["4X 3.0"], 7.0));
        assert!(by_address.contains_key("4X 4.1"));

        let by_name = session.read(KeyKind::Name).await.unwrap().unwrap();
        assert!(approx(by_name["Temperature"], 7.0));

        let by_id = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert!(approx(by_id["temp"], 7.0));
    }

    #[tokio::test]
    async fn test_zoom_scaling_on_read() {
        let mut transport = MockTransport::new();
        transport.set_register(2, 100);
        let mut session = session(transport, plant_units());

        let values = session.read(KeyKind::CommunicationTag).await.unwrap().unwrap();
        assert!(approx(values["SPD"], 10.0));
    }

    #[tokio::test]
    async fn test_all_absent_reads_as_none() {
        let mut transport = MockTransport::new();
        transport.reply = Reply::Empty;
        let mut session = session(transport, plant_units());

        assert!(session.read(KeyKind::CommunicationTag).await.unwrap().is_none());
        assert_eq!(session.error_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_block_yields_null_values() {
        let mut transport = MockTransport::new();
        transport.set_register(2, 10);
        transport.absent.push("4X 4".to_string());
        let mut session = session(transport, plant_units());

        let values = session.read(KeyKind::CommunicationTag).await.unwrap().unwrap();
        assert_eq!(values["FLG"], None);
        assert!(approx(values["SPD"], 1.0));
    }

    #[tokio::test]
    async fn test_shared_key_aborts_read() {
        let mut transport = MockTransport::new();
        transport.set_register(1, 11);
        transport.set_register(2, 22);
        let units = vec![
            AddressUnit::new("a".to_string(), "4X", 1, DataType::U16),
            AddressUnit::new("b".to_string(), "4X", 2, DataType::U16),
        ];
        let mut session = session(transport, units);

        // Neither unit has a tag, so both key as "".
        let err = session.read(KeyKind::CommunicationTag).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_recoverable());
        assert_eq!(session.error_count(), 1);

        let values = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert_eq!(values.len(), 2);
        assert!(approx(values["a"], 11.0));
        assert!(approx(values["b"], 22.0));
        assert_eq!(session.error_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_address_key_aborts_read() {
        let units = vec![
            AddressUnit::new("lo".to_string(), "4X", 3, DataType::U16),
            AddressUnit::new("signed".to_string(), "4X", 3, DataType::I16),
        ];
        let mut session = session(MockTransport::new(), units);

        let err = session.read(KeyKind::Address).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'address': '4X 3.0' is shared by several addresses"
        );
    }

    #[tokio::test]
    async fn test_shared_key_in_absent_block_aborts_read() {
        let mut transport = MockTransport::new();
        transport.reply = Reply::Empty;
        let units = vec![
            AddressUnit::new("a".to_string(), "4X", 1, DataType::U16).with_name("Pump"),
            AddressUnit::new("b".to_string(), "4X", 2, DataType::U16).with_name("Pump"),
        ];
        let mut session = session(transport, units);

        let err = session.read(KeyKind::Name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_short_reply_aborts_read() {
        let mut transport = MockTransport::new();
        transport.reply = Reply::Short;
        let mut session = session(transport, plant_units());

        let err = session.read(KeyKind::CommunicationTag).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(session.error_count(), 1);
        // Fail fast: the second block is never fetched.
        assert_eq!(session.transport().fetches.len(), 1);
    }

    #[tokio::test]
    async fn test_error_threshold_forces_disconnect() {
        let mut transport = MockTransport::new();
        transport.reply = Reply::Short;
        let mut session = session(transport, plant_units());
        session.set_keep_connect(true);

        assert!(session.read(KeyKind::CommunicationTag).await.is_err());
        assert!(session.is_connected());
        assert!(session.read(KeyKind::CommunicationTag).await.is_err());
        assert!(session.is_connected());
        assert!(session.read(KeyKind::CommunicationTag).await.is_err());
        assert!(!session.is_connected());
        assert_eq!(session.error_count(), 3);

        session.transport_mut().reply = Reply::Normal;
        session.transport_mut().set_register(2, 1);
        assert!(session.read(KeyKind::CommunicationTag).await.unwrap().is_some());
        assert!(session.is_connected());
        assert_eq!(session.error_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnects_after_every_call_without_keep_connect() {
        let mut transport = MockTransport::new();
        transport.set_register(2, 1);
        let mut session = session(transport, plant_units());

        session.read(KeyKind::CommunicationTag).await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.transport().disconnects, 1);

        session.transport_mut().reply = Reply::Short;
        assert!(session.read(KeyKind::CommunicationTag).await.is_err());
        assert!(!session.is_connected());
        assert_eq!(session.transport().disconnects, 2);
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_counted() {
        let mut transport = MockTransport::new();
        transport.refuse_connect = true;
        let mut session = session(transport, plant_units());

        let err = session.read(KeyKind::CommunicationTag).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(session.error_count(), 0);
        assert!(session.transport().fetches.is_empty());

        let values = HashMap::from([("SPD".to_string(), 1.0)]);
        let err = session.write(KeyKind::CommunicationTag, &values).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let mut session = session(MockTransport::new(), plant_units());
        session.set_keep_connect(true);

        let values = HashMap::from([
            ("SPD".to_string(), 10.0),
            ("TMP".to_string(), -40.0),
            ("FLG".to_string(), 1.0),
        ]);
        let report = session.write(KeyKind::CommunicationTag, &values).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.written, ["SPD", "TMP", "FLG"]);
        assert_eq!(session.transport().register(2), 100);
        assert_eq!(session.transport().register(3) as i16, -40);

        let read = session.read(KeyKind::CommunicationTag).await.unwrap().unwrap();
        assert!(approx(read["SPD"], 10.0));
        assert!(approx(read["TMP"], -40.0));
        assert!(approx(read["FLG"], 1.0));
    }

    #[tokio::test]
    async fn test_write_skips_read_only_bit() {
        let units = vec![
            AddressUnit::new("a1".to_string(), "0X", 1, DataType::Bool)
                .with_tag("A1")
                .read_only(),
            AddressUnit::new("b1".to_string(), "4X", 10, DataType::U16).with_tag("B1"),
        ];
        let mut session = session(MockTransport::new(), units);

        let values = HashMap::from([("A1".to_string(), 500.0), ("B1".to_string(), 42.0)]);
        let report = session.write(KeyKind::CommunicationTag, &values).await.unwrap();

        assert_eq!(report.written, ["B1"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(
            &report.skipped[0],
            RegisterError::KeyResolution { key, .. } if key == "A1"
        ));
        assert_eq!(session.transport().register(10), 42);
        assert!(!session.transport().coils[1]);
        assert!(session.transport().stores.iter().all(|(a, _)| a != "0X 1"));
        assert_eq!(session.error_count(), 0);
    }

    #[tokio::test]
    async fn test_write_skips_unknown_key() {
        let mut session = session(MockTransport::new(), plant_units());

        let values = HashMap::from([("NOPE".to_string(), 1.0)]);
        let report = session.write(KeyKind::CommunicationTag, &values).await.unwrap();

        assert!(report.written.is_empty());
        assert_eq!(report.skipped[0].kind(), ErrorKind::KeyResolution);
        assert!(session.transport().fetches.is_empty());
    }

    #[tokio::test]
    async fn test_write_skips_ambiguous_key() {
        let units = vec![
            AddressUnit::new("a".to_string(), "4X", 1, DataType::U16).with_name("Pump"),
            AddressUnit::new("b".to_string(), "4X", 2, DataType::U16).with_name("Pump"),
        ];
        let mut session = session(MockTransport::new(), units);

        let values = HashMap::from([("Pump".to_string(), 1.0)]);
        let report = session.write(KeyKind::Name, &values).await.unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_write_accepts_short_address_key() {
        let units = vec![AddressUnit::new("a".to_string(), "4X", 7, DataType::U16)];
        let mut session = session(MockTransport::new(), units);

        let values = HashMap::from([("4X 7".to_string(), 9.0)]);
        let report = session.write(KeyKind::Address, &values).await.unwrap();
        assert_eq!(report.written, ["4X 7.0"]);
        assert_eq!(session.transport().register(7), 9);
    }

    #[tokio::test]
    async fn test_write_bit_preserves_neighbours() {
        let mut transport = MockTransport::new();
        transport.set_register(5, 0x00FF);
        let units = vec![AddressUnit::new("b".to_string(), "4X", 5, DataType::Bool)
            .with_sub_address(1)
            .with_tag("B")];
        let mut session = session(transport, units);

        let values = HashMap::from([("B".to_string(), 1.0)]);
        session.write(KeyKind::CommunicationTag, &values).await.unwrap();

        assert_eq!(session.transport().register(5), 0x02FF);
        assert_eq!(session.transport().fetches, [("4X 5".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_write_coil_preserves_neighbours() {
        let mut transport = MockTransport::new();
        transport.coils[3] = true;
        transport.coils[9] = true;
        let units = vec![AddressUnit::new("c2".to_string(), "0X", 2, DataType::Bool).with_tag("C2")];
        let mut session = session(transport, units);

        let values = HashMap::from([("C2".to_string(), 1.0)]);
        session.write(KeyKind::CommunicationTag, &values).await.unwrap();

        let coils = &session.transport().coils;
        assert!(coils[2]);
        assert!(coils[3]);
        assert!(coils[9]);
        assert!(!coils[4]);
    }

    #[tokio::test]
    async fn test_failed_store_keeps_earlier_blocks() {
        let mut transport = MockTransport::new();
        transport.fail_store_at = Some(2);
        let units = vec![
            AddressUnit::new("a".to_string(), "4X", 1, DataType::U16).with_tag("A"),
            AddressUnit::new("b".to_string(), "4X", 20, DataType::U16).with_tag("B"),
        ];
        let mut session = session(transport, units);

        let values = HashMap::from([("A".to_string(), 11.0), ("B".to_string(), 22.0)]);
        let err = session.write(KeyKind::CommunicationTag, &values).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(session.transport().register(1), 11);
        assert_eq!(session.transport().register(20), 0);
        assert_eq!(session.error_count(), 1);
    }

    #[tokio::test]
    async fn test_short_read_before_write_aborts() {
        let mut transport = MockTransport::new();
        transport.reply = Reply::Empty;
        let mut session = session(transport, plant_units());

        let values = HashMap::from([("SPD".to_string(), 1.0)]);
        let err = session.write(KeyKind::CommunicationTag, &values).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(session.transport().stores.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_write_is_decode_error() {
        let mut session = session(MockTransport::new(), plant_units());

        let values = HashMap::from([("TMP".to_string(), 40000.0)]);
        let err = session.write(KeyKind::CommunicationTag, &values).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(session.error_count(), 1);
    }

    #[tokio::test]
    async fn test_numeric_jump_read_uses_one_request() {
        let mut transport = MockTransport::new();
        for address in [2, 3, 4, 6, 8] {
            transport.set_register(address, address as u16);
        }
        let units: Vec<AddressUnit> = [2u32, 3, 4, 6, 8]
            .into_iter()
            .map(|a| AddressUnit::new(format!("r{a}"), "4X", a, DataType::U16))
            .collect();
        let config = SessionConfig::new("plc-1").with_read_combiner(CombinerKind::NumericJump {
            max_length: 100,
            jump_byte_count: 4,
        });
        let mut session = DeviceSession::modbus(config, transport, units).unwrap();

        let values = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert_eq!(session.transport().fetches, [("4X 2".to_string(), 14)]);
        assert!(approx(values["r6"], 6.0));
        assert!(approx(values["r8"], 8.0));
    }

    #[tokio::test]
    async fn test_little_endian_session() {
        let mut transport = MockTransport::new();
        transport.registers[4] = 0x34;
        transport.registers[5] = 0x12;
        let units = vec![AddressUnit::new("w".to_string(), "4X", 2, DataType::U16)];
        let config = SessionConfig::new("plc-1").with_endian(Endian::LittleEndianLsb);
        let mut session = DeviceSession::modbus(config, transport, units).unwrap();

        let values = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert!(approx(values["w"], f64::from(0x1234u16)));
    }

    #[tokio::test]
    async fn test_custom_combiner_injection() {
        let mut transport = MockTransport::new();
        transport.set_register(2, 5);
        transport.set_register(3, 6);
        let units: Vec<AddressUnit> = [2u32, 3]
            .into_iter()
            .map(|a| AddressUnit::new(format!("r{a}"), "4X", a, DataType::U16))
            .collect();
        let mut session = session(transport, units).with_read_combiner(Box::new(SingleCombiner));

        let values = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert_eq!(session.transport().fetches.len(), 2);
        assert!(approx(values["r3"], 6.0));
    }

    #[tokio::test]
    async fn test_generic_key_type() {
        let mut transport = MockTransport::new();
        transport.set_register(1, 3);
        let units = vec![AddressUnit::new(17u32, "4X", 1, DataType::U16)];
        let mut session: DeviceSession<MockTransport, u32> =
            DeviceSession::modbus(SessionConfig::new("plc-2"), transport, units).unwrap();

        let values = session.read(KeyKind::Id).await.unwrap().unwrap();
        assert!(approx(values["17"], 3.0));
        assert_eq!(session.address_unit_by_id(&17).unwrap().unwrap().address, 1);
    }

    #[test]
    fn test_address_unit_by_id() {
        let mut units = plant_units();
        let session = session(MockTransport::new(), units.clone());
        assert_eq!(
            session.address_unit_by_id(&"temp".to_string()).unwrap().unwrap().address,
            3
        );
        assert!(session.address_unit_by_id(&"none".to_string()).unwrap().is_none());

        units.push(AddressUnit::new("temp".to_string(), "4X", 9, DataType::U16));
        let session = self::session(MockTransport::new(), units);
        let err = session.address_unit_by_id(&"temp".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyResolution);
    }

    #[test]
    fn test_accessors() {
        let mut session = session(MockTransport::new(), plant_units());
        assert_eq!(session.id(), "plc-1");
        assert_eq!(session.connection_token(), "mock:502");
        assert!(!session.keep_connect());
        assert_eq!(session.addresses().len(), 3);
        assert_eq!(session.codec().endian(), Endian::BigEndianLsb);

        session.set_addresses(Vec::new());
        assert!(session.addresses().is_empty());
    }

    #[test]
    fn test_invalid_combiner_config() {
        let config = SessionConfig::new("plc-1")
            .with_write_combiner(CombinerKind::Continuous { max_length: 0 });
        let result = DeviceSession::modbus(config, MockTransport::new(), plant_units());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("x");
        assert_eq!(config.max_error_count, DEFAULT_MAX_ERROR_COUNT);
        assert_eq!(config.endian, Endian::BigEndianLsb);
        assert_eq!(config.read_combiner, CombinerKind::Continuous { max_length: 100 });
        assert_eq!(config.write_combiner, config.read_combiner);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"id":"boiler","keep_connect":true,"endian":"little_endian_lsb",
                "read_combiner":{"kind":"single"}}"#,
        )
        .unwrap();
        assert!(config.keep_connect);
        assert_eq!(config.endian, Endian::LittleEndianLsb);
        assert_eq!(config.read_combiner, CombinerKind::Single);
        assert_eq!(config.max_error_count, 3);
        assert_eq!(config.write_combiner, CombinerKind::default());
    }
}
