//! Explorer / ICE register protocol
//!
//! Explorer is driven with tag frames (see [`ocapi_chip::explorer`]) and
//! answers through a 5-byte response fetched with a block read on `0x02`.
//!
//! # Slot access
//!
//! ```text
//! read slot:   [3, 4, addr] → response      select for read
//!              [4, 4, addr] → response      fetch: value
//!                           → response      pipeline flush (required)
//!
//! write slot:  [5, 8, addr ++ half] → response
//! ```
//!
//! A narrow register is one slot. A wide register is two slots, high half
//! first. `double_read` / `double_write` hide the split.

use crate::bus::{Endpoint, I2cBus};
use crate::codec::{decode, encode};
use crate::error::{OcapiError, Result};
use crate::training::PollConfig;
use ocapi_chip::catalog::{FIRMWARE_PRIMING, FIRMWARE_REGISTERS, FIRMWARE_RESTORE};
use ocapi_chip::explorer::{
    bus_address, reg, sentinel, status, tag, Address, LinkFrequency, ADDRESS_OFFSET,
    RESPONSE_COMMAND, RESPONSE_LEN,
};
use ocapi_chip::fire::id;
use ocapi_chip::i2c;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Identification words read from Explorer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerIdentity {
    /// Enterprise-mode status
    pub enterprise_mode: u64,
    /// ECID words, most significant first
    pub ecid: Vec<u64>,
    /// Card identifier
    pub card_id: u64,
}

/// ICE / Gemini FPGA identification word
///
/// The high word is laid out like the FIRE version register; the low word
/// carries the release and chip id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IceId(pub u64);

impl IceId {
    const fn high(self) -> u64 {
        self.0 >> 32
    }

    /// Git revision of the bitstream
    pub const fn git_rev(self) -> u64 {
        self.high() & id::BUILD_MASK
    }

    /// Bitstream built from a dirty tree
    pub const fn is_dirty(self) -> bool {
        self.high() & id::DIRTY != 0
    }

    /// Link frequency the bitstream was built for
    pub const fn frequency(self) -> LinkFrequency {
        if (self.high() & id::FREQ_DEF) >> 29 == id::FREQ_400_MHZ {
            LinkFrequency::Mhz400
        } else {
            LinkFrequency::Mhz333
        }
    }

    /// Major and minor release
    #[allow(clippy::cast_possible_truncation)]
    pub const fn release(self) -> (u8, u8) {
        (((self.0 >> 28) & 0xF) as u8, ((self.0 >> 24) & 0xF) as u8)
    }

    /// Chip id byte
    #[allow(clippy::cast_possible_truncation)]
    pub const fn chip_id(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl std::fmt::Display for IceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor) = self.release();
        writeln!(f, "ID            = {:#x}", self.0)?;
        writeln!(f, "ICE git rev   = {:#x}", self.git_rev())?;
        writeln!(f, "ICE dirty bit = {}", u8::from(self.is_dirty()))?;
        writeln!(f, "ICE Frequency = {}", self.frequency())?;
        writeln!(f, "Release       = {major}.{minor}")?;
        write!(f, "Chip ID       = {:#x}", self.chip_id())
    }
}

fn check_sentinel(value: u64) {
    match value & 0xFFFF_FFFF {
        sentinel::NOT_SET => warn!("ICE address has not been set yet by hardware"),
        sentinel::OUT_OF_RANGE => error!("ICE address is outside the hardware range"),
        _ => {}
    }
}

/// Explorer on an I2C bus
#[derive(Debug)]
pub struct ExplorerBus<B: I2cBus> {
    ep: Endpoint<B>,
}

impl<B: I2cBus> ExplorerBus<B> {
    /// Probe Explorer at its fixed address
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotPresent` if Explorer does not acknowledge.
    pub fn open(bus: B) -> Result<Self> {
        Ok(Self {
            ep: Endpoint::open(bus, i2c::EXPLORER)?,
        })
    }

    /// 5-byte block read at `command`, marker byte cleared
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn simple_read(&mut self, command: u8) -> Result<u64> {
        let mut buf = [0u8; RESPONSE_LEN];
        self.ep.write_read(&[command], &mut buf)?;
        buf[0] = 0;
        decode(&buf)
    }

    /// One `[tag, width, addr…]` frame
    ///
    /// # Errors
    ///
    /// Returns `InvalidWidth` before any traffic for a width outside 1..=8,
    /// otherwise propagates bus errors.
    pub fn simple_write(&mut self, addr: u64, kind: u8, width: usize) -> Result<()> {
        let body = encode(addr, width)?;
        // encode() has bounded width to 8
        #[allow(clippy::cast_possible_truncation)]
        let mut frame = vec![kind, width as u8];
        frame.extend(body);
        self.ep.write(&frame)
    }

    fn response(&mut self) -> Result<u64> {
        self.simple_read(RESPONSE_COMMAND)
    }

    /// Pending response word, with the ICE sentinel values logged
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn read_response(&mut self) -> Result<u64> {
        let value = self.response()?;
        check_sentinel(value);
        debug!("Explorer response {value:#x}");
        Ok(value)
    }

    /// Send `frame` as is, e.g. a hand-built tag frame
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug!("Explorer raw frame {frame:02x?}");
        self.ep.write(frame)
    }

    /// Send `frame`, then fetch the response it produced
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn query(&mut self, frame: &[u8]) -> Result<u64> {
        self.write_frame(frame)?;
        self.read_response()
    }

    fn read_slot(&mut self, slot: u64) -> Result<u64> {
        let addr = bus_address(slot);
        self.simple_write(addr, tag::SELECT_READ, 4)?;
        self.response()?;
        self.simple_write(addr, tag::FETCH, 4)?;
        let value = self.response()?;
        self.response()?;
        Ok(value)
    }

    fn write_slot(&mut self, slot: u64, half: u64) -> Result<()> {
        let word = (bus_address(slot) << 32) | (half & 0xFFFF_FFFF);
        self.simple_write(word, tag::WRITE, 8)?;
        self.response()?;
        Ok(())
    }

    /// Read a register, reassembling wide registers high half first
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn double_read(&mut self, addr: impl Into<Address>) -> Result<u64> {
        let addr = addr.into();
        let mut value = 0u64;
        for slot in addr.slots() {
            value = (value << 32) | self.read_slot(slot)?;
        }
        debug!("Explorer read {addr} -> {value:#x}");
        Ok(value)
    }

    fn write_readback(&mut self, addr: Address, data: u64) -> Result<u64> {
        debug!("Explorer write {addr} <- {data:#x}");
        let halves = if addr.is_wide() {
            [data >> 32, data & 0xFFFF_FFFF]
        } else {
            [data & 0xFFFF_FFFF; 2]
        };
        for (slot, half) in addr.slots().zip(halves) {
            self.write_slot(slot, half)?;
        }
        self.double_read(addr)?;
        self.double_read(addr)
    }

    /// Write a register, then compare a second readback against `data`
    ///
    /// # Errors
    ///
    /// Propagates bus errors. A readback mismatch is `Ok(false)`.
    pub fn double_write(&mut self, addr: impl Into<Address>, data: u64) -> Result<bool> {
        let addr = addr.into();
        let actual = self.write_readback(addr, data)?;
        if actual != data {
            warn!("Explorer readback {addr}: wrote {data:#x}, read {actual:#x}");
        }
        Ok(actual == data)
    }

    /// Like [`double_write`](Self::double_write) but a mismatch is an error
    ///
    /// # Errors
    ///
    /// Returns `WriteVerificationFailed` on mismatch, or the bus error.
    pub fn double_write_verified(&mut self, addr: impl Into<Address>, data: u64) -> Result<()> {
        let addr = addr.into();
        let actual = self.write_readback(addr, data)?;
        if actual != data {
            return Err(OcapiError::WriteVerificationFailed {
                register: u64::from(addr.logical()),
                expected: data,
                actual,
            });
        }
        Ok(())
    }

    /// Select the reference clock and wait for the clock block to settle
    ///
    /// # Errors
    ///
    /// Returns `TrainingTimeout` if the busy field does not clear within
    /// `poll.timeout`, or the bus error.
    pub fn init(&mut self, freq: LinkFrequency, poll: &PollConfig) -> Result<()> {
        info!("Explorer clock select {freq}");
        self.simple_write(reg::CLOCK_SELECT + freq.select_byte(), tag::CONTROL, 4)?;

        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            let v = self.response()?;
            polls += 1;
            if v & status::BUSY == 0 {
                break;
            }
            if start.elapsed() >= poll.timeout {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = poll.timeout.as_millis() as u64;
                return Err(OcapiError::TrainingTimeout { duration_ms });
            }
            std::thread::sleep(poll.interval);
        }
        self.response()?;
        debug!("Explorer clock settled after {polls} polls");
        Ok(())
    }

    /// Start link training on the Explorer side
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn start_training(&mut self, freq: LinkFrequency) -> Result<()> {
        info!("Explorer training start {freq}");
        self.simple_write(reg::TRAINING_START + freq.select_byte(), tag::CONTROL, 4)
    }

    /// Firmware information block as `(label, value)` pairs
    ///
    /// Primes the firmware mailbox, walks the catalog, then restores the
    /// mailbox. A bus error aborts the walk.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn firmware_info(&mut self) -> Result<Vec<(&'static str, u64)>> {
        for raw in FIRMWARE_PRIMING {
            self.simple_write(raw.wrapping_add(ADDRESS_OFFSET << 32), tag::WRITE, 8)?;
            self.response()?;
        }

        let mailbox = bus_address(reg::FW_MAILBOX);
        self.simple_write(mailbox, tag::SELECT_READ, 4)?;
        self.response()?;
        self.simple_write(mailbox, tag::FETCH, 4)?;
        self.response()?;

        let mut info = Vec::with_capacity(FIRMWARE_REGISTERS.len());
        for r in &FIRMWARE_REGISTERS {
            self.simple_write(r.address, tag::SELECT_READ, 4)?;
            self.response()?;
            self.simple_write(r.address, tag::FETCH, 4)?;
            let value = self.response()?;
            debug!("{} : {value:#x}", r.label);
            info.push((r.label, value));
        }

        for (addr, value) in FIRMWARE_RESTORE {
            if !self.double_write(addr, value)? {
                warn!("Firmware mailbox restore of {addr:#010x} did not read back");
            }
        }
        Ok(info)
    }

    /// Enterprise mode, ECID and card id
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn identity(&mut self) -> Result<ExplorerIdentity> {
        let enterprise_mode = self.double_read(reg::ENTERPRISE_MODE)?;
        let ecid = (reg::ECID_LAST..=reg::ECID_FIRST)
            .rev()
            .step_by(4)
            .map(|a| self.double_read(a))
            .collect::<Result<Vec<_>>>()?;
        let card_id = self.double_read(reg::CARD_ID)?;
        Ok(ExplorerIdentity {
            enterprise_mode,
            ecid,
            card_id,
        })
    }

    /// ICE / Gemini identification word
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn ice_id(&mut self) -> Result<IceId> {
        let value = self.double_read(reg::ICE_ID)?;
        check_sentinel(value);
        Ok(IceId(value))
    }

    /// Release Explorer and hand back the bus
    pub fn into_inner(self) -> B {
        self.ep.into_inner()
    }
}
