//! Example: Reading and writing registers through a device session
//!
//! Run with: cargo run --example simple_read
//!
//! This example demonstrates:
//! - Describing a device with an address table
//! - Reading every register by tag, by name and by address
//! - Batching with the continuous and numeric jump combiners
//! - Writing a value and a single bit without disturbing its neighbours
//!
//! The device is simulated in memory so the example runs without hardware.

use std::collections::HashMap;

use async_trait::async_trait;
use plc_registers::utils::{byte_to_bits, format_hex};
use plc_registers::{
    AddressTranslator, AddressUnit, CombinerKind, DataType, DeviceSession, KeyKind,
    ModbusAddressTranslator, RegisterError, SessionConfig, Transport,
};

/// Holding registers of a simulated Modbus device.
struct SimulatedDevice {
    registers: Vec<u8>,
    connected: bool,
    requests: usize,
}

impl SimulatedDevice {
    fn new() -> Self {
        let mut registers = vec![0u8; 64];
        // 4X 10 = 2150 (tank level in 0.01 m)
        registers[20..22].copy_from_slice(&2150u16.to_be_bytes());
        // 4X 11 = -12 (temperature)
        registers[22..24].copy_from_slice(&(-12i16).to_be_bytes());
        // 4X 12..13 = 1.5 (flow, f32)
        registers[24..28].copy_from_slice(&1.5f32.to_be_bytes());
        // 4X 16 = status word, bits 0 and 3 of its first byte set
        registers[32] = 0b0000_1001;
        Self {
            registers,
            connected: false,
            requests: 0,
        }
    }

    fn span(&self, address: &str, len: usize) -> plc_registers::Result<std::ops::Range<usize>> {
        let def = ModbusAddressTranslator.parse(address)?;
        let start = def.address as usize * 2;
        if def.area != "4X" || start + len > self.registers.len() {
            return Err(RegisterError::transport(address, "illegal data address"));
        }
        Ok(start..start + len)
    }
}

#[async_trait]
impl Transport for SimulatedDevice {
    async fn connect(&mut self) -> plc_registers::Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> plc_registers::Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn fetch(&mut self, address: &str, byte_count: usize) -> plc_registers::Result<Vec<u8>> {
        self.requests += 1;
        let span = self.span(address, byte_count)?;
        Ok(self.registers[span].to_vec())
    }

    async fn store(&mut self, address: &str, payload: &[u8]) -> plc_registers::Result<()> {
        self.requests += 1;
        let span = self.span(address, payload.len())?;
        self.registers[span].copy_from_slice(payload);
        Ok(())
    }

    fn connection_token(&self) -> String {
        "simulated:502".to_string()
    }
}

fn tank_table() -> Vec<AddressUnit> {
    vec![
        AddressUnit::new("level".to_string(), "4X", 10, DataType::U16)
            .with_zoom(0.01)
            .with_tag("LEVEL")
            .with_name("Tank level"),
        AddressUnit::new("temp".to_string(), "4X", 11, DataType::I16)
            .with_tag("TEMP")
            .with_name("Temperature")
            .read_only(),
        AddressUnit::new("flow".to_string(), "4X", 12, DataType::F32)
            .with_tag("FLOW")
            .with_name("Flow rate"),
        AddressUnit::new("pump".to_string(), "4X", 16, DataType::Bool)
            .with_tag("PUMP")
            .with_name("Pump running"),
        AddressUnit::new("alarm".to_string(), "4X", 16, DataType::Bool)
            .with_sub_address(3)
            .with_tag("ALARM")
            .with_name("High level alarm"),
    ]
}

#[tokio::main]
async fn main() -> plc_registers::Result<()> {
    // =========================================================================
    // Create a session
    // =========================================================================

    let config = SessionConfig::new("tank-1").with_keep_connect(true);
    let mut session = DeviceSession::modbus(config, SimulatedDevice::new(), tank_table())?;

    // =========================================================================
    // Reading by key
    // =========================================================================

    println!("=== Reading by tag ===\n");

    if let Some(values) = session.read(KeyKind::CommunicationTag).await? {
        let mut tags: Vec<_> = values.keys().collect();
        tags.sort();
        for tag in tags {
            println!("{tag:<6} = {:?}", values[tag]);
        }
    }
    println!("\nRequests so far: {}", session.transport().requests);

    println!("\n=== Reading by name and address ===\n");

    if let Some(values) = session.read(KeyKind::Name).await? {
        println!("Tank level = {:?} m", values["Tank level"]);
    }
    if let Some(values) = session.read(KeyKind::Address).await? {
        println!("4X 16.3   = {:?}", values["4X 16.3"]);
    }

    // =========================================================================
    // Writing
    // =========================================================================

    println!("\n=== Writing ===\n");

    let report = session
        .write(
            KeyKind::CommunicationTag,
            &HashMap::from([
                ("LEVEL".to_string(), 18.75),
                ("PUMP".to_string(), 0.0),
                ("TEMP".to_string(), 99.0),
            ]),
        )
        .await?;
    println!("Written: {:?}", report.written);
    for skipped in &report.skipped {
        println!("Skipped: {skipped}");
    }

    let status = &session.transport().registers[32..34];
    println!("Status word after write: {}", format_hex(status));
    println!("First byte bits: {:?}", byte_to_bits(status[0]));

    // =========================================================================
    // Gap bridging
    // =========================================================================

    println!("\n=== Numeric jump combination ===\n");

    let config = SessionConfig::new("tank-1").with_read_combiner(CombinerKind::NumericJump {
        max_length: 100,
        jump_byte_count: 8,
    });
    let mut session = DeviceSession::modbus(config, SimulatedDevice::new(), tank_table())?;
    session.read(KeyKind::Id).await?;
    println!(
        "Whole table read in {} request(s)",
        session.transport().requests
    );

    Ok(())
}
