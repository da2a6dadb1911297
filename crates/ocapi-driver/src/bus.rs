//! Bus abstraction for the I2C control path
//!
//! Every register protocol talks to hardware through [`I2cBus`]. One call is
//! one bus transaction: no batching, no reordering, no retry.

use crate::backends::{LinuxI2c, SimulatedBus};
use crate::error::{OcapiError, Result};
use std::fmt::Debug;
use tracing::{debug, error};

/// I2C bus trait - one atomic transaction per call
pub trait I2cBus: Debug {
    /// Addressed write of `payload`
    ///
    /// # Errors
    ///
    /// Returns `BusIo` if the transfer is rejected.
    fn write(&mut self, address: u8, payload: &[u8]) -> Result<()>;

    /// Addressed read filling `buffer`
    ///
    /// # Errors
    ///
    /// Returns `BusIo` if the transfer is rejected or comes back short.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write `command` then read `buffer` with a repeated start
    ///
    /// # Errors
    ///
    /// Returns `BusIo` if the transfer is rejected.
    fn write_read(&mut self, address: u8, command: &[u8], buffer: &mut [u8]) -> Result<()>;

    /// Zero-length handshake; `Ok(false)` when nothing acknowledges
    ///
    /// # Errors
    ///
    /// Returns an error only if the adapter itself fails.
    fn probe(&mut self, address: u8) -> Result<bool>;

    /// Get bus type for debugging
    fn bus_type(&self) -> BusType;
}

impl<B: I2cBus + ?Sized> I2cBus for &mut B {
    fn write(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        (**self).write(address, payload)
    }
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        (**self).read(address, buffer)
    }
    fn write_read(&mut self, address: u8, command: &[u8], buffer: &mut [u8]) -> Result<()> {
        (**self).write_read(address, command, buffer)
    }
    fn probe(&mut self, address: u8) -> Result<bool> {
        (**self).probe(address)
    }
    fn bus_type(&self) -> BusType {
        (**self).bus_type()
    }
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn write(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        (**self).write(address, payload)
    }
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        (**self).read(address, buffer)
    }
    fn write_read(&mut self, address: u8, command: &[u8], buffer: &mut [u8]) -> Result<()> {
        (**self).write_read(address, command, buffer)
    }
    fn probe(&mut self, address: u8) -> Result<bool> {
        (**self).probe(address)
    }
    fn bus_type(&self) -> BusType {
        (**self).bus_type()
    }
}

/// Bus type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    /// Linux i2c-dev adapter (/dev/i2c-N)
    Linux,

    /// In-process board simulation, no hardware required
    Simulated,
}

impl std::fmt::Display for BusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "i2c-dev"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Bus selection
#[derive(Debug, Clone)]
pub enum BusSelection {
    /// Open `/dev/i2c-N`
    Linux(u32),

    /// Use a handle onto a shared simulated board
    Simulated(SimulatedBus),
}

/// Open a bus handle for the selection
///
/// Each call yields an independent handle; Linux handles own their own file
/// descriptor, simulated handles share the board state.
///
/// # Errors
///
/// Returns `BusNotFound` if the adapter does not exist, or `Io` if it cannot be opened.
pub fn open_bus(selection: &BusSelection) -> Result<Box<dyn I2cBus>> {
    match selection {
        BusSelection::Linux(bus) => LinuxI2c::open(*bus).map(|b| Box::new(b) as Box<dyn I2cBus>),
        BusSelection::Simulated(sim) => Ok(Box::new(sim.clone())),
    }
}

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// A bus handle bound to one device address
///
/// Only constructed through a successful probe. Dropping it releases the bus.
#[derive(Debug)]
pub struct Endpoint<B: I2cBus> {
    bus: B,
    address: u8,
}

impl<B: I2cBus> Endpoint<B> {
    /// Probe `address` and bind to it
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotPresent` if the probe is not acknowledged, or the
    /// adapter error if the probe itself fails.
    pub fn open(mut bus: B, address: u8) -> Result<Self> {
        if !bus.probe(address)? {
            error!("Device {address:#04x} not detected on {} bus", bus.bus_type());
            return Err(OcapiError::device_not_present(address));
        }
        debug!("Bound endpoint {address:#04x} on {} bus", bus.bus_type());
        Ok(Self { bus, address })
    }

    /// Device address
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Addressed write
    ///
    /// # Errors
    ///
    /// Propagates the bus error.
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.bus.write(self.address, payload)
    }

    /// Addressed read
    ///
    /// # Errors
    ///
    /// Propagates the bus error.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.bus.read(self.address, buffer)
    }

    /// Combined write/read
    ///
    /// # Errors
    ///
    /// Propagates the bus error.
    pub fn write_read(&mut self, command: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.bus.write_read(self.address, command, buffer)
    }

    /// Release the endpoint and hand back the bus
    pub fn into_inner(self) -> B {
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_requires_ack() {
        let sim = SimulatedBus::new().without(ocapi_chip::i2c::FIRE);
        let err = Endpoint::open(sim.clone(), ocapi_chip::i2c::FIRE).unwrap_err();
        assert!(matches!(err, OcapiError::DeviceNotPresent { address: 0x38 }));

        let ep = Endpoint::open(sim, ocapi_chip::i2c::EXPLORER).unwrap();
        assert_eq!(ep.address(), 0x20);
    }

    #[test]
    fn open_simulated_shares_state() {
        let sim = SimulatedBus::new();
        let mut bus = open_bus(&BusSelection::Simulated(sim.clone())).unwrap();
        assert_eq!(bus.bus_type(), BusType::Simulated);
        bus.write(ocapi_chip::i2c::MUX_PATH, &[0x01]).unwrap();
        assert_eq!(sim.transactions().len(), 1);
    }
}
