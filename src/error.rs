//! Error types for register access.
//!
//! Every failure surfaced by this crate is a [`RegisterError`]. Each variant
//! maps onto one [`ErrorKind`], which is what callers usually branch on:
//! key resolution failures are recovered locally by the write pipeline,
//! everything else aborts the current read or write.

use thiserror::Error;

/// Result type alias for register operations.
pub type Result<T> = std::result::Result<T, RegisterError>;

/// Coarse classification of a [`RegisterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connecting to or disconnecting from the device failed.
    Connection,
    /// A fetch or store failed, or the device answered with a short buffer.
    Transport,
    /// A value could not be extracted from or patched into a buffer.
    Decode,
    /// A write key did not resolve to a writable address. Non-fatal.
    KeyResolution,
    /// Invalid address text, unknown area, invalid parameters or a key shared by several addresses.
    Configuration,
}

/// Errors that can occur while combining, decoding or exchanging registers.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The transport could not connect or disconnect.
    #[error("Connection failure on {token}: {reason}")]
    Connection {
        /// Connection token of the transport.
        token: String,
        /// Description of the failure.
        reason: String,
    },

    /// A fetch or store failed, or the reply was malformed.
    #[error("Transport failure at {address}: {reason}")]
    Transport {
        /// Formatted start address of the request.
        address: String,
        /// Description of the failure.
        reason: String,
    },

    /// Extracting or patching a value failed.
    #[error("Decode failure: {reason}")]
    Decode {
        /// Description of the failure.
        reason: String,
    },

    /// A key could not be resolved to a writable address unit.
    #[error("Key '{key}' not resolved: {reason}")]
    KeyResolution {
        /// The key supplied by the caller.
        key: String,
        /// Why the key was skipped.
        reason: String,
    },

    /// Malformed address text or unknown area.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The offending address or area.
        address: String,
        /// Description of the addressing error.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },
}

impl RegisterError {
    /// Creates a new `Connection` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::{ErrorKind, RegisterError};
    ///
    /// let err = RegisterError::connection("4X:127.0.0.1:502", "connection refused");
    /// assert_eq!(err.kind(), ErrorKind::Connection);
    /// ```
    pub fn connection(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Transport` error.
    pub fn transport(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Decode` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::RegisterError;
    ///
    /// let err = RegisterError::decode("offset 4 out of range for 2 byte buffer");
    /// ```
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Creates a new `KeyResolution` error.
    pub fn key_resolution(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyResolution {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddress` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_registers::RegisterError;
    ///
    /// let err = RegisterError::invalid_address("5X 1", "unknown area");
    /// ```
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::KeyResolution { .. } => ErrorKind::KeyResolution,
            Self::InvalidAddress { .. } | Self::InvalidParameter { .. } => {
                ErrorKind::Configuration
            }
        }
    }

    /// Returns `true` if the error skips a single key instead of aborting the call.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::KeyResolution
    }
}
