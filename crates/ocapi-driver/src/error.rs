//! Error types for OpenCAPI link operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, OcapiError>;

/// Errors that can occur while driving the FIRE / Explorer control bus
#[derive(Debug, Error)]
pub enum OcapiError {
    /// Codec asked for a width it cannot represent
    #[error("Invalid register width: {width} bytes (expected 1..=8)")]
    InvalidWidth {
        /// Requested width in bytes
        width: usize,
    },

    /// I2C adapter device file missing
    #[error("I2C bus not found: {path}")]
    BusNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Probe got no acknowledge
    #[error("Device {address:#04x} is not detected on the bus")]
    DeviceNotPresent {
        /// 7-bit device address
        address: u8,
    },

    /// A single bus transaction failed
    #[error("Bus transfer to {address:#04x} failed: {reason}")]
    BusIo {
        /// 7-bit device address
        address: u8,
        /// Reason for failure
        reason: String,
    },

    /// Readback after a write did not match
    #[error("Write verification failed at {register:#x}: wrote {expected:#x}, read {actual:#x}")]
    WriteVerificationFailed {
        /// Register address
        register: u64,
        /// Value written
        expected: u64,
        /// Value read back
        actual: u64,
    },

    /// Completion poll exceeded its bound
    #[error("Training timeout after {duration_ms}ms")]
    TrainingTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Training status read back without the done bit
    #[error("Training failed (status {status:#x})")]
    TrainingFailed {
        /// Raw status register value
        status: u64,
    },

    /// Link frequency outside the supported profiles
    #[error("Unsupported link frequency: {mhz} MHz (expected 333 or 400)")]
    UnsupportedFrequency {
        /// Requested frequency
        mhz: u32,
    },

    /// DDIMM target not valid for the operation
    #[error("Invalid target {target}: {reason}")]
    InvalidTarget {
        /// Target letter
        target: char,
        /// Reason for rejection
        reason: String,
    },

    /// Link step requested from the wrong state
    #[error("Link is {actual}, {operation} needs {expected}")]
    InvalidLinkState {
        /// Step that was refused
        operation: &'static str,
        /// State the step needs
        expected: &'static str,
        /// State the link was in
        actual: &'static str,
    },

    /// I/O error opening or talking to the adapter
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl OcapiError {
    /// Create a bus-not-found error
    pub fn bus_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BusNotFound { path: path.into() }
    }

    /// Create a device-not-present error
    pub const fn device_not_present(address: u8) -> Self {
        Self::DeviceNotPresent { address }
    }

    /// Create a bus I/O error
    pub fn bus_io(address: u8, reason: impl Into<String>) -> Self {
        Self::BusIo {
            address,
            reason: reason.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target(target: char, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target,
            reason: reason.into(),
        }
    }

    /// Whether the current command cannot continue (probe failure or missing adapter)
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceNotPresent { .. } | Self::BusNotFound { .. })
    }
}
