//! DDIMM EEPROM access
//!
//! Every read is an offset write (2 bytes, big-endian) followed by a
//! one-byte read. The EEPROM does not acknowledge while an internal write
//! cycle runs, so a rejected offset write is retried once after a short wait.

use crate::bus::{Endpoint, I2cBus};
use crate::error::{OcapiError, Result};
use ocapi_chip::eeprom::{self, Vendor};
use ocapi_chip::i2c;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait before retrying a rejected offset write
pub const RETRY_DELAY: Duration = Duration::from_millis(5);

/// Size and vendor decoded from the EEPROM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdimmInfo {
    /// Memory size, `None` for an unknown density byte
    pub memory_gb: Option<u32>,
    /// Vendor from the manufacturer ID
    pub vendor: Vendor,
    /// Vendor named by the legacy vendor byte, if any
    pub legacy_vendor: Option<Vendor>,
}

impl std::fmt::Display for DdimmInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.memory_gb {
            Some(gb) => writeln!(f, "Memory Size : {gb}GB")?,
            None => writeln!(f, "Memory Size : unknown")?,
        }
        write!(f, "Vendor      : {}", self.vendor)
    }
}

/// DDIMM EEPROM on an I2C bus
#[derive(Debug)]
pub struct Eeprom<B: I2cBus> {
    ep: Endpoint<B>,
}

impl<B: I2cBus> Eeprom<B> {
    /// Probe the EEPROM at its fixed address
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotPresent` if the EEPROM does not acknowledge.
    pub fn open(bus: B) -> Result<Self> {
        Ok(Self {
            ep: Endpoint::open(bus, i2c::EEPROM)?,
        })
    }

    fn write_offset(&mut self, offset: u16, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(eeprom::OFFSET_BYTES + data.len());
        frame.extend_from_slice(&offset.to_be_bytes());
        frame.extend_from_slice(data);
        match self.ep.write(&frame) {
            Err(OcapiError::BusIo { reason, .. }) => {
                debug!("EEPROM write at {offset:#05x} rejected ({reason}), retrying");
                std::thread::sleep(RETRY_DELAY);
                self.ep.write(&frame)
            }
            other => other,
        }
    }

    /// Write `data` starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `BusIo` if the write is rejected twice.
    pub fn write(&mut self, offset: u16, data: &[u8]) -> Result<()> {
        self.write_offset(offset, data)
    }

    /// One byte at `offset`
    ///
    /// # Errors
    ///
    /// Returns `BusIo` if the offset write is rejected twice, or the read error.
    pub fn read_byte(&mut self, offset: u16) -> Result<u8> {
        self.write_offset(offset, &[])?;
        let mut b = [0u8];
        self.ep.read(&mut b)?;
        Ok(b[0])
    }

    /// The first [`eeprom::HEADER_LEN`] bytes, one read each
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn header(&mut self) -> Result<Vec<u8>> {
        (0..eeprom::HEADER_LEN).map(|o| self.read_byte(o)).collect()
    }

    /// Memory size and vendor
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn info(&mut self) -> Result<DdimmInfo> {
        let density = self.read_byte(eeprom::DENSITY)?;
        let memory_gb = eeprom::memory_gb(density);
        if memory_gb.is_none() {
            warn!("Unknown DDIMM density byte {density:#04x}");
        }

        let legacy_vendor = Vendor::from_legacy(self.read_byte(eeprom::LEGACY_VENDOR)?);
        let id = u16::from_be_bytes([
            self.read_byte(eeprom::MANUFACTURER_ID)?,
            self.read_byte(eeprom::MANUFACTURER_ID + 1)?,
        ]);
        info!("DDIMM manufacturer ID {id:#06x}");

        Ok(DdimmInfo {
            memory_gb,
            vendor: Vendor::from_manufacturer_id(id),
            legacy_vendor,
        })
    }

    /// Release the EEPROM and hand back the bus
    pub fn into_inner(self) -> B {
        self.ep.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedBus, Transaction};

    #[test]
    fn read_is_offset_write_then_one_byte() {
        let sim = SimulatedBus::new();
        let mut rom = Eeprom::open(sim.clone()).unwrap();
        sim.clear_log();
        assert_eq!(rom.read_byte(0x201).unwrap(), 0x2C);
        assert_eq!(
            sim.transactions(),
            vec![
                Transaction::Write {
                    address: 0x50,
                    bytes: vec![0x02, 0x01],
                },
                Transaction::Read { address: 0x50, len: 1 },
            ]
        );
    }

    #[test]
    fn busy_write_retried_once() {
        let sim = SimulatedBus::new();
        let mut rom = Eeprom::open(sim.clone()).unwrap();
        sim.eeprom_busy(1);
        assert_eq!(rom.read_byte(eeprom::DENSITY).unwrap(), 0x85);

        sim.eeprom_busy(2);
        let err = rom.read_byte(eeprom::DENSITY).unwrap_err();
        assert!(matches!(err, OcapiError::BusIo { address: 0x50, .. }));
    }

    #[test]
    fn info_of_default_part() {
        let sim = SimulatedBus::new();
        let mut rom = Eeprom::open(sim.clone()).unwrap();
        let info = rom.info().unwrap();
        assert_eq!(info.memory_gb, Some(32));
        assert_eq!(info.vendor, Vendor::Micron);
        assert_eq!(info.legacy_vendor, Some(Vendor::Ibm));
        assert_eq!(info.to_string(), "Memory Size : 32GB\nVendor      : MICRON");

        sim.set_eeprom_byte(eeprom::DENSITY, 0x86);
        sim.set_eeprom_byte(0x200, 0x01);
        sim.set_eeprom_byte(0x201, 0x94);
        let info = rom.info().unwrap();
        assert_eq!(info.memory_gb, Some(64));
        assert_eq!(info.vendor, Vendor::Smart);
    }

    #[test]
    fn header_is_sixteen_bytes() {
        let mut rom = Eeprom::open(SimulatedBus::new()).unwrap();
        let header = rom.header().unwrap();
        assert_eq!(header.len(), 16);
        assert_eq!(header[4], 0x85);
    }

    #[test]
    fn write_then_read() {
        let mut rom = Eeprom::open(SimulatedBus::new()).unwrap();
        rom.write(0x300, &[0xA5, 0x5A]).unwrap();
        assert_eq!(rom.read_byte(0x301).unwrap(), 0x5A);
    }
}
