//! Simulated board backend
//!
//! Implements [`I2cBus`] for an in-process model of one carrier: FIRE, the
//! Explorer/ICE chip, the path muxes, the DDIMM PMICs and the DDIMM EEPROM.
//! This enables:
//!
//! 1. **CI without hardware**: the protocol layers and the training sequencer
//!    run end to end against byte-exact device models.
//!
//! 2. **Wire-format assertions**: every transaction is logged with its bytes.
//!
//! 3. **Fault injection**: [`SimulatedBus::fail_after`] makes the bus start
//!    rejecting transfers mid-sequence.
//!
//! ## Device models
//!
//! ```text
//! FIRE      8-byte write latches an address; the read FIFO gets the value
//!           latched by the *previous* address write (one-deep pipeline).
//!           16-byte write stores address ++ data.
//! Explorer  tag frames select / fetch / write 32-bit slots; block read on
//!           0x02 returns [0x04, response]. Clock select reports busy for a
//!           configurable number of polls.
//! EEPROM    2-byte offset then data; reads continue from the offset.
//! Muxes     one-byte register.
//! PMICs     register 0x32.
//! ```
//!
//! Link training completes once Explorer has been armed (training start
//! control write) and FIRE has received the second DL control sync value.
//!
//! Handles are cheap clones sharing one board.

// Slots are 32 bits; register halves are truncated on purpose
#![allow(clippy::cast_possible_truncation)]

use crate::bus::{BusType, I2cBus};
use crate::codec::decode;
use crate::error::{OcapiError, Result};
use ocapi_chip::ddimm::Ddimm;
use ocapi_chip::explorer::{self, tag, Address, ADDRESS_OFFSET, RESPONSE_COMMAND};
use ocapi_chip::{catalog, fire, i2c};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, info};

/// One logged bus transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Addressed write
    Write {
        /// Device address
        address: u8,
        /// Bytes on the wire
        bytes: Vec<u8>,
    },
    /// Addressed read
    Read {
        /// Device address
        address: u8,
        /// Bytes requested
        len: usize,
    },
    /// Combined write/read
    WriteRead {
        /// Device address
        address: u8,
        /// Command bytes
        command: Vec<u8>,
        /// Bytes requested
        len: usize,
    },
    /// Quick-write probe
    Probe {
        /// Device address
        address: u8,
    },
}

impl Transaction {
    /// Device address of the transaction
    pub const fn address(&self) -> u8 {
        match self {
            Self::Write { address, .. }
            | Self::Read { address, .. }
            | Self::WriteRead { address, .. }
            | Self::Probe { address } => *address,
        }
    }
}

/// Bits reported in the Explorer response while the clock block is busy
const BUSY_RESPONSE: u32 = 0x0000_0100;

/// Default FIRE bitstream: a clean 400 MHz build
const DEFAULT_FIRE_ID: u64 = 0x090A_D53D;

/// EEPROM size modelled, bytes
const EEPROM_SIZE: usize = 1024;

/// Simulated board
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    board: Rc<RefCell<Board>>,
}

#[derive(Debug)]
struct Board {
    present: BTreeSet<u8>,
    fire: FireModel,
    explorer: ExplorerModel,
    eeprom: EepromModel,
    /// Mux registers and PMIC enable registers
    bytes: HashMap<u8, u8>,
    log: Vec<Transaction>,
    /// Transactions left before injected faults start
    fail_after: Option<usize>,
}

#[derive(Debug, Default)]
struct FireModel {
    regs: HashMap<u64, u64>,
    pending: u64,
    fifo: VecDeque<u8>,
    synced: BTreeSet<Ddimm>,
    /// Bits that never stick, per register
    clear_on_write: HashMap<u64, u64>,
}

#[derive(Debug, Default)]
struct ExplorerModel {
    slots: HashMap<u64, u32>,
    response: u32,
    busy_polls: u32,
    clock_polls: u32,
    armed: bool,
}

#[derive(Debug)]
struct EepromModel {
    data: Vec<u8>,
    offset: usize,
    /// Writes left to reject while an internal write cycle runs
    busy_writes: u32,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// A fully populated board: FIRE, Explorer, muxes, DDIMM PMICs and EEPROM
    pub fn new() -> Self {
        let present = [
            i2c::FIRE,
            i2c::EXPLORER,
            i2c::MUX_APOLLO,
            i2c::MUX_PATH,
            i2c::MUX_DDIMM,
            i2c::PMIC1,
            i2c::PMIC2,
            i2c::EEPROM,
        ]
        .into_iter()
        .collect();

        let mut fire_model = FireModel::default();
        fire_model.regs.insert(fire::VERSION, DEFAULT_FIRE_ID);
        fire_model.regs.insert(fire::RESET_CONTROL, 0x1F);
        fire_model.regs.insert(fire::LED_CONTROL, 0);
        fire_model.regs.insert(fire::LED_OVERRIDE, 0);
        fire_model.regs.insert(fire::DDIMM_DETECT, 0x3);
        for d in Ddimm::ALL {
            if let (Some(ctl), Some(status)) = (d.dl_control(), d.status()) {
                fire_model.regs.insert(ctl, 0);
                fire_model.regs.insert(status, 0);
            }
        }

        let mut explorer_model = ExplorerModel {
            clock_polls: 3,
            ..ExplorerModel::default()
        };
        let fw_values: [u32; 19] = [
            2, 0, 1, 3, 0, 42, 0x2020_0701, 1, 2, 0, 17, 0x2020_0415, 0x0010_0000, 0x20, 0x00EF_4017,
            0x1000, 0x0080_0000, 0x400, 0,
        ];
        for (reg, value) in catalog::FIRMWARE_REGISTERS.iter().zip(fw_values) {
            explorer_model.slots.insert(reg.address - ADDRESS_OFFSET, value);
        }
        explorer_model.slots.insert(u64::from(explorer::reg::ENTERPRISE_MODE), 0x1);
        explorer_model.slots.insert(u64::from(explorer::reg::CARD_ID), 0x0001_0002);
        let mut eeprom = EepromModel {
            data: vec![0; EEPROM_SIZE],
            offset: 0,
            busy_writes: 0,
        };
        // 32 GB Micron part
        eeprom.data[..8].copy_from_slice(&[0x23, 0x09, 0x12, 0x0B, 0x85, 0x21, 0x00, 0x08]);
        eeprom.data[0x200] = 0x80;
        eeprom.data[0x201] = 0x2C;

        let mut ecid = explorer::reg::ECID_FIRST;
        while ecid >= explorer::reg::ECID_LAST {
            explorer_model.slots.insert(u64::from(ecid), ecid.wrapping_mul(0x9E37_79B9));
            ecid -= 4;
        }

        Self {
            board: Rc::new(RefCell::new(Board {
                present,
                fire: fire_model,
                explorer: explorer_model,
                eeprom,
                bytes: HashMap::new(),
                log: Vec::new(),
                fail_after: None,
            })),
        }
    }

    /// Remove a device from the board (it stops acknowledging)
    #[must_use]
    pub fn without(self, address: u8) -> Self {
        self.board.borrow_mut().present.remove(&address);
        self
    }

    /// Add a device that only answers probes
    #[must_use]
    pub fn with_device(self, address: u8) -> Self {
        self.board.borrow_mut().present.insert(address);
        self
    }

    /// Set the FIRE version register
    #[must_use]
    pub fn with_fire_id(self, id: u64) -> Self {
        self.set_fire_register(fire::VERSION, id);
        self
    }

    /// Number of busy responses after an Explorer clock select
    #[must_use]
    pub fn with_clock_polls(self, polls: u32) -> Self {
        self.board.borrow_mut().explorer.clock_polls = polls;
        self
    }

    /// Make `bits` of a FIRE register read back cleared after every write
    #[must_use]
    pub fn with_fire_clear_on_write(self, addr: u64, bits: u64) -> Self {
        self.board.borrow_mut().fire.clear_on_write.insert(addr, bits);
        self
    }

    /// Reject the next `n` EEPROM writes, as during an internal write cycle
    pub fn eeprom_busy(&self, n: u32) {
        self.board.borrow_mut().eeprom.busy_writes = n;
    }

    /// EEPROM byte at `offset`
    pub fn eeprom_byte(&self, offset: u16) -> u8 {
        self.board.borrow().eeprom.data.get(usize::from(offset)).copied().unwrap_or(0xFF)
    }

    /// Set the EEPROM byte at `offset`
    pub fn set_eeprom_byte(&self, offset: u16, value: u8) {
        if let Some(b) = self.board.borrow_mut().eeprom.data.get_mut(usize::from(offset)) {
            *b = value;
        }
    }

    /// Let `n` more transactions through, then fail every one after
    pub fn fail_after(&self, n: usize) {
        self.board.borrow_mut().fail_after = Some(n);
    }

    /// Transactions seen so far, oldest first
    pub fn transactions(&self) -> Vec<Transaction> {
        self.board.borrow().log.clone()
    }

    /// Forget logged transactions
    pub fn clear_log(&self) {
        self.board.borrow_mut().log.clear();
    }

    /// Current FIRE register value
    pub fn fire_register(&self, addr: u64) -> u64 {
        self.board.borrow().fire.get(addr)
    }

    /// Overwrite a FIRE register
    pub fn set_fire_register(&self, addr: u64, value: u64) {
        self.board.borrow_mut().fire.regs.insert(addr, value);
    }

    /// Current Explorer register value, reassembled from its slots
    pub fn explorer_register(&self, logical: u32) -> u64 {
        let board = self.board.borrow();
        Address::new(logical)
            .slots()
            .fold(0, |acc, slot| (acc << 32) | u64::from(board.explorer.slot(slot)))
    }

    /// Overwrite an Explorer register (split across slots if wide)
    pub fn set_explorer_register(&self, logical: u32, value: u64) {
        let mut board = self.board.borrow_mut();
        let a = Address::new(logical);
        if a.is_wide() {
            let base = a.base();
            board.explorer.slots.insert(base, (value >> 32) as u32);
            board.explorer.slots.insert(base + 4, value as u32);
        } else {
            board.explorer.slots.insert(a.base(), value as u32);
        }
    }

    /// Value of a mux or PMIC enable register
    pub fn device_byte(&self, address: u8) -> u8 {
        self.board.borrow().bytes.get(&address).copied().unwrap_or(0)
    }

    /// Set a mux or PMIC enable register
    pub fn set_device_byte(&self, address: u8, value: u8) {
        self.board.borrow_mut().bytes.insert(address, value);
    }
}

impl Board {
    fn begin(&mut self, address: u8, t: Transaction) -> Result<()> {
        if let Some(left) = self.fail_after.as_mut() {
            if *left == 0 {
                return Err(OcapiError::bus_io(address, "injected fault"));
            }
            *left -= 1;
        }
        if !self.present.contains(&address) {
            return Err(OcapiError::bus_io(address, "no acknowledge"));
        }
        self.log.push(t);
        Ok(())
    }

    /// Training finishes when both sides have done their part
    fn update_link(&mut self) {
        if !self.explorer.armed || self.fire.synced.is_empty() {
            return;
        }
        let status = Address::new(explorer::reg::TRAINING_STATUS).base();
        let high = self.explorer.slot(status);
        self.explorer
            .slots
            .insert(status, high | (explorer::reg::TRAINING_DONE >> 32) as u32);
        let synced: Vec<Ddimm> = self.fire.synced.iter().copied().collect();
        for d in synced {
            if let Some(addr) = d.status() {
                let v = self.fire.get(addr);
                self.fire.regs.insert(addr, v | fire::host_conf::LINK_UP);
            }
        }
        info!("Simulated link trained");
    }
}

impl FireModel {
    fn get(&self, addr: u64) -> u64 {
        self.regs.get(&addr).copied().unwrap_or(fire::REG_NOT_FOUND)
    }

    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        match bytes.len() {
            8 => {
                let addr = decode(bytes).map_err(|e| e.to_string())?;
                self.fifo = self.pending.to_be_bytes().into_iter().collect();
                self.pending = self.get(addr);
                Ok(())
            }
            16 => {
                let addr = decode(&bytes[..8]).map_err(|e| e.to_string())?;
                let mut data = decode(&bytes[8..]).map_err(|e| e.to_string())?;
                if let Some(bits) = self.clear_on_write.get(&addr) {
                    data &= !bits;
                }
                self.regs.insert(addr, data);
                if data == fire::host_conf::SYNC_SEQUENCE[1] {
                    if let Some(d) = Ddimm::ALL.into_iter().find(|d| d.dl_control() == Some(addr)) {
                        self.synced.insert(d);
                    }
                }
                Ok(())
            }
            n => Err(format!("unexpected {n}-byte FIRE frame")),
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        for b in buffer {
            *b = self.fifo.pop_front().unwrap_or(0xFF);
        }
    }
}

impl ExplorerModel {
    fn slot(&self, slot: u64) -> u32 {
        self.slots.get(&slot).copied().unwrap_or(0)
    }

    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        let (&kind, rest) = bytes.split_first().ok_or("empty Explorer frame")?;
        let (&width, body) = rest.split_first().ok_or("truncated Explorer frame")?;
        if usize::from(width) != body.len() {
            return Err(format!("frame width {width} but {} bytes follow", body.len()));
        }
        let value = decode(body).map_err(|e| e.to_string())?;

        match kind {
            tag::SELECT_READ => self.response = 0,
            tag::FETCH => self.response = self.slot(value.wrapping_sub(ADDRESS_OFFSET)),
            tag::WRITE => {
                let slot = (value >> 32).wrapping_sub(ADDRESS_OFFSET);
                self.slots.insert(slot, value as u32);
                self.response = 0;
            }
            tag::CONTROL => {
                match value.checked_sub(explorer::reg::CLOCK_SELECT) {
                    Some(1 | 3) => self.busy_polls = self.clock_polls,
                    _ => {}
                }
                match value.checked_sub(explorer::reg::TRAINING_START) {
                    Some(1 | 3) => self.armed = true,
                    _ => {}
                }
                self.response = 0;
            }
            t => return Err(format!("unknown command tag {t}")),
        }
        Ok(())
    }

    fn respond(&mut self, buffer: &mut [u8]) {
        let word = if self.busy_polls > 0 {
            self.busy_polls -= 1;
            BUSY_RESPONSE
        } else {
            self.response
        };
        let frame = [0x04, (word >> 24) as u8, (word >> 16) as u8, (word >> 8) as u8, word as u8];
        for (b, f) in buffer.iter_mut().zip(frame.into_iter().chain(std::iter::repeat(0))) {
            *b = f;
        }
    }
}

impl EepromModel {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        if self.busy_writes > 0 {
            self.busy_writes -= 1;
            return Err("EEPROM busy".into());
        }
        let (offset, data) = match bytes {
            [hi, lo, data @ ..] => (usize::from(u16::from_be_bytes([*hi, *lo])), data),
            _ => return Err(format!("EEPROM needs a 2-byte offset, got {bytes:02x?}")),
        };
        let end = offset + data.len();
        if end > self.data.len() {
            return Err(format!("EEPROM offset {offset:#x} out of range"));
        }
        self.data[offset..end].copy_from_slice(data);
        self.offset = end;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) {
        for b in buffer {
            *b = self.data.get(self.offset).copied().unwrap_or(0xFF);
            self.offset = (self.offset + 1) % self.data.len();
        }
    }
}

impl I2cBus for SimulatedBus {
    fn write(&mut self, address: u8, payload: &[u8]) -> Result<()> {
        let mut board = self.board.borrow_mut();
        board.begin(
            address,
            Transaction::Write {
                address,
                bytes: payload.to_vec(),
            },
        )?;
        debug!("sim {address:#04x} <- {payload:02x?}");

        let outcome = match address {
            i2c::FIRE => board.fire.write(payload),
            i2c::EXPLORER => board.explorer.write(payload),
            i2c::EEPROM => board.eeprom.write(payload),
            i2c::PMIC1 | i2c::PMIC2 => match payload {
                [i2c::PMIC_ENABLE_CMD, v] => {
                    board.bytes.insert(address, *v);
                    Ok(())
                }
                _ => Err(format!("unexpected PMIC frame {payload:02x?}")),
            },
            _ => match payload {
                [v] => {
                    board.bytes.insert(address, *v);
                    Ok(())
                }
                _ => Err(format!("unexpected {}-byte frame", payload.len())),
            },
        };
        outcome.map_err(|reason| OcapiError::bus_io(address, reason))?;
        board.update_link();
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        let mut board = self.board.borrow_mut();
        board.begin(
            address,
            Transaction::Read {
                address,
                len: buffer.len(),
            },
        )?;
        match address {
            i2c::FIRE => board.fire.read(buffer),
            i2c::EXPLORER => return Err(OcapiError::bus_io(address, "Explorer needs a command byte")),
            i2c::EEPROM => board.eeprom.read(buffer),
            _ => {
                let v = board.bytes.get(&address).copied().unwrap_or(0);
                buffer.fill(v);
            }
        }
        debug!("sim {address:#04x} -> {buffer:02x?}");
        Ok(())
    }

    fn write_read(&mut self, address: u8, command: &[u8], buffer: &mut [u8]) -> Result<()> {
        let mut board = self.board.borrow_mut();
        board.begin(
            address,
            Transaction::WriteRead {
                address,
                command: command.to_vec(),
                len: buffer.len(),
            },
        )?;
        match (address, command) {
            (i2c::EXPLORER, [RESPONSE_COMMAND]) => board.explorer.respond(buffer),
            (i2c::PMIC1 | i2c::PMIC2, [i2c::PMIC_ENABLE_CMD]) => {
                let v = board.bytes.get(&address).copied().unwrap_or(0);
                buffer.fill(v);
            }
            _ => {
                return Err(OcapiError::bus_io(
                    address,
                    format!("unsupported command {command:02x?}"),
                ))
            }
        }
        debug!("sim {address:#04x} [{command:02x?}] -> {buffer:02x?}");
        Ok(())
    }

    fn probe(&mut self, address: u8) -> Result<bool> {
        let mut board = self.board.borrow_mut();
        if let Some(left) = board.fail_after.as_mut() {
            if *left == 0 {
                return Err(OcapiError::bus_io(address, "injected fault"));
            }
            *left -= 1;
        }
        board.log.push(Transaction::Probe { address });
        Ok(board.present.contains(&address))
    }

    fn bus_type(&self) -> BusType {
        BusType::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_read_pipeline_lags_one_access() {
        let mut sim = SimulatedBus::new();
        sim.set_fire_register(fire::RESET_CONTROL, 0x1F);
        let mut buf = [0u8; 8];

        sim.write(i2c::FIRE, &fire::RESET_CONTROL.to_be_bytes()).unwrap();
        sim.read(i2c::FIRE, &mut buf).unwrap();
        assert_eq!(u64::from_be_bytes(buf), 0);

        sim.write(i2c::FIRE, &fire::RESET_CONTROL.to_be_bytes()).unwrap();
        sim.read(i2c::FIRE, &mut buf).unwrap();
        assert_eq!(u64::from_be_bytes(buf), 0x1F);
    }

    #[test]
    fn explorer_fetch_returns_slot() {
        let mut sim = SimulatedBus::new();
        sim.set_explorer_register(0x0020_B080, 0xCAFE);
        let mut resp = [0u8; 5];
        sim.write(i2c::EXPLORER, &[tag::FETCH, 4, 0xA0, 0x20, 0xB0, 0x80]).unwrap();
        sim.write_read(i2c::EXPLORER, &[RESPONSE_COMMAND], &mut resp).unwrap();
        assert_eq!(resp, [0x04, 0x00, 0x00, 0xCA, 0xFE]);
    }

    #[test]
    fn malformed_explorer_frame_rejected() {
        let mut sim = SimulatedBus::new();
        let err = sim.write(i2c::EXPLORER, &[tag::WRITE, 8, 0, 0]).unwrap_err();
        assert!(matches!(err, OcapiError::BusIo { address: 0x20, .. }));
    }

    #[test]
    fn injected_fault_after_budget() {
        let mut sim = SimulatedBus::new();
        sim.fail_after(1);
        sim.write(i2c::MUX_PATH, &[1]).unwrap();
        assert!(sim.write(i2c::MUX_PATH, &[0]).is_err());
        assert_eq!(sim.device_byte(i2c::MUX_PATH), 1);
        assert_eq!(sim.transactions().len(), 1);
    }

    #[test]
    fn eeprom_reads_from_written_offset() {
        let mut sim = SimulatedBus::new();
        let mut b = [0u8; 2];
        sim.write(i2c::EEPROM, &[0x02, 0x00]).unwrap();
        sim.read(i2c::EEPROM, &mut b).unwrap();
        assert_eq!(b, [0x80, 0x2C]);

        sim.write(i2c::EEPROM, &[0x00, 0x10, 0xAB]).unwrap();
        assert_eq!(sim.eeprom_byte(0x10), 0xAB);
        assert!(sim.write(i2c::EEPROM, &[0x00]).is_err());
    }

    #[test]
    fn fire_clear_on_write_bits() {
        let mut sim = SimulatedBus::new().with_fire_clear_on_write(fire::LED_CONTROL, 0x1);
        let mut frame = fire::LED_CONTROL.to_be_bytes().to_vec();
        frame.extend(0x3u64.to_be_bytes());
        sim.write(i2c::FIRE, &frame).unwrap();
        assert_eq!(sim.fire_register(fire::LED_CONTROL), 0x2);
    }

    #[test]
    fn absent_device_nacks() {
        let mut sim = SimulatedBus::new().without(i2c::PMIC2);
        assert!(!sim.probe(i2c::PMIC2).unwrap());
        assert!(sim.write(i2c::PMIC2, &[i2c::PMIC_ENABLE_CMD, 0x80]).is_err());
    }
}
