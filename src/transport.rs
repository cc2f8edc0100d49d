//! Transport collaborator for device sessions.
//!
//! This module defines the [`Transport`] trait which a
//! [`DeviceSession`](crate::DeviceSession) uses to move raw bytes to and from
//! a device. The transport is completely separated from the register layer:
//! it only knows about formatted start addresses and byte buffers.
//!
//! # Design
//!
//! The transport layer follows these principles:
//!
//! - **Register agnostic** - Handles only byte transfer, no types, keys or scaling
//! - **Asynchronous** - Every I/O method may suspend on the physical link
//! - **Explicit failures** - Errors are returned as [`RegisterError`](crate::RegisterError), never as sentinels
//!
//! # Reply Contract
//!
//! | `fetch` result | Meaning |
//! |----------------|---------|
//! | `Ok(bytes)` with `bytes.len() == byte_count` | Normal reply |
//! | `Ok(bytes)` with `bytes.is_empty()` | Address not present on the device |
//! | `Ok(bytes)` with `0 < bytes.len() < byte_count` | Malformed reply, the session aborts |
//! | `Err(_)` | Link failure or timeout |
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use plc_registers::{Result, Transport};
//!
//! struct Loopback {
//!     memory: Vec<u8>,
//!     connected: bool,
//! }
//!
//! #[async_trait]
//! impl Transport for Loopback {
//!     async fn connect(&mut self) -> Result<()> {
//!         self.connected = true;
//!         Ok(())
//!     }
//!
//!     async fn disconnect(&mut self) -> Result<()> {
//!         self.connected = false;
//!         Ok(())
//!     }
//!
//!     fn is_connected(&self) -> bool {
//!         self.connected
//!     }
//!
//!     async fn fetch(&mut self, _address: &str, byte_count: usize) -> Result<Vec<u8>> {
//!         Ok(self.memory.iter().copied().take(byte_count).collect())
//!     }
//!
//!     async fn store(&mut self, _address: &str, payload: &[u8]) -> Result<()> {
//!         self.memory[..payload.len()].copy_from_slice(payload);
//!         Ok(())
//!     }
//!
//!     fn connection_token(&self) -> String {
//!         "loopback".to_string()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::Result;

/// Byte-level access to one device.
///
/// Implementations wrap a protocol stack (Modbus TCP/RTU, FINS, ...) and are
/// driven by exactly one session at a time.
#[async_trait]
pub trait Transport: Send {
    /// Opens the link to the device.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Connection`](crate::RegisterError::Connection)
    /// if the link cannot be established.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the link to the device.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Connection`](crate::RegisterError::Connection)
    /// if the link cannot be closed cleanly.
    async fn disconnect(&mut self) -> Result<()>;

    /// Returns `true` if the link is open.
    fn is_connected(&self) -> bool;

    /// Reads `byte_count` bytes starting at the formatted `address`.
    ///
    /// An empty reply means the address is not present on the device.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Transport`](crate::RegisterError::Transport)
    /// on link failure or timeout.
    async fn fetch(&mut self, address: &str, byte_count: usize) -> Result<Vec<u8>>;

    /// Writes `payload` starting at the formatted `address`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Transport`](crate::RegisterError::Transport)
    /// if the device rejects the write or the link fails.
    async fn store(&mut self, address: &str, payload: &[u8]) -> Result<()>;

    /// Returns a string identifying the physical endpoint, e.g. `"192.168.1.10:502"`.
    fn connection_token(&self) -> String;
}
