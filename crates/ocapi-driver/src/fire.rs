//! FIRE register protocol and host-side link control
//!
//! FIRE registers are 64-bit address / 64-bit data. A write is one 16-byte
//! frame (address ++ data). A read is an 8-byte address frame followed by
//! eight single-byte reads from the chip's output FIFO.
//!
//! The FIFO is one access behind: the bytes read after an address frame are
//! the value latched by the *previous* address frame. Callers that need the
//! current value use [`FireBus::read_register_stable`].

use crate::bus::{Endpoint, I2cBus};
use crate::codec::{decode, encode};
use crate::error::{OcapiError, Result};
use crate::training::{SyncMismatch, SyncReport};
use ocapi_chip::ddimm::{apply_reset, Ddimm, DdimmSet, ResetState};
use ocapi_chip::explorer::LinkFrequency;
use ocapi_chip::fire::{self, host_conf, id};
use ocapi_chip::i2c;
use tracing::{debug, info, warn};

/// Contents of the FIRE version register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireId(pub u64);

impl FireId {
    /// Raw register value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Bitstream built from a dirty tree
    pub const fn is_dirty(self) -> bool {
        self.0 & id::DIRTY != 0
    }

    /// Link frequency the bitstream was built for
    pub fn frequency(self) -> LinkFrequency {
        match fire::link_mhz(self.0) {
            400 => LinkFrequency::Mhz400,
            _ => LinkFrequency::Mhz333,
        }
    }
}

impl std::fmt::Display for FireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID : {:#x} | Is Dirty? {}",
            self.0,
            if self.is_dirty() { "Yes" } else { "No" }
        )
    }
}

/// FIRE on an I2C bus
#[derive(Debug)]
pub struct FireBus<B: I2cBus> {
    ep: Endpoint<B>,
}

impl<B: I2cBus> FireBus<B> {
    /// Probe FIRE at its fixed address
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotPresent` if FIRE does not acknowledge.
    pub fn open(bus: B) -> Result<Self> {
        Ok(Self {
            ep: Endpoint::open(bus, i2c::FIRE)?,
        })
    }

    /// Single register read (subject to the one-deep FIFO lag)
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn read_register(&mut self, addr: u64) -> Result<u64> {
        self.ep.write(&encode(addr, 8)?)?;
        let mut bytes = [0u8; 8];
        for b in &mut bytes {
            self.ep.read(std::slice::from_mut(b))?;
        }
        let value = decode(&bytes)?;
        debug!("FIRE read {addr:#018x} -> {value:#x}");
        Ok(value)
    }

    /// Two reads of the same register; returns the second
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn read_register_stable(&mut self, addr: u64) -> Result<u64> {
        self.read_register(addr)?;
        let value = self.read_register(addr)?;
        if value == fire::REG_NOT_FOUND {
            warn!("FIRE register {addr:#018x} does not decode");
        }
        Ok(value)
    }

    /// Single 16-byte write frame, no readback
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn write_register_unchecked(&mut self, addr: u64, data: u64) -> Result<()> {
        let mut frame = encode(addr, 8)?;
        frame.extend(encode(data, 8)?);
        debug!("FIRE write {addr:#018x} <- {data:#x}");
        self.ep.write(&frame)
    }

    /// Write, flush, then compare a second readback against `data`
    ///
    /// # Errors
    ///
    /// Propagates bus errors. A readback mismatch is `Ok(false)`.
    pub fn write_register(&mut self, addr: u64, data: u64) -> Result<bool> {
        let actual = self.write_readback(addr, data)?;
        if actual != data {
            warn!("FIRE readback {addr:#018x}: wrote {data:#x}, read {actual:#x}");
        }
        Ok(actual == data)
    }

    /// Like [`write_register`](Self::write_register) but a mismatch is an error
    ///
    /// # Errors
    ///
    /// Returns `WriteVerificationFailed` on mismatch, or the bus error.
    pub fn write_register_verified(&mut self, addr: u64, data: u64) -> Result<()> {
        let actual = self.write_readback(addr, data)?;
        if actual != data {
            return Err(OcapiError::WriteVerificationFailed {
                register: addr,
                expected: data,
                actual,
            });
        }
        Ok(())
    }

    fn write_readback(&mut self, addr: u64, data: u64) -> Result<u64> {
        self.write_register_unchecked(addr, data)?;
        self.read_register_stable(addr)
    }

    /// Send `frame` as is, e.g. a hand-built address ++ data frame
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug!("FIRE raw frame {frame:02x?}");
        self.ep.write(frame)
    }

    /// Bitstream ID
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn chip_id(&mut self) -> Result<FireId> {
        let fid = FireId(self.read_register_stable(fire::VERSION)?);
        if !fire::is_known_build(fid.raw()) {
            warn!("FIRE bitstream {:#x} is not a known build, assuming 333 MHz", fid.raw());
        }
        if fid.is_dirty() {
            info!("FIRE bitstream {:#x} is dirty", fid.raw());
        }
        Ok(fid)
    }

    /// Release FIRE and hand back the bus
    pub fn into_inner(self) -> B {
        self.ep.into_inner()
    }

    // ── Link control ─────────────────────────────────────────────────────────

    /// Put targets into or out of reset
    ///
    /// Read-modify-write of the reset-control register. The write is not
    /// verified. Returns the value written.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn set_ddimm_reset(&mut self, state: ResetState, targets: DdimmSet) -> Result<u64> {
        let current = self.read_register_stable(fire::RESET_CONTROL)?;
        let value = apply_reset(current, state, targets);
        info!("DDIMM reset {state:?} [{targets}]: {current:#x} -> {value:#x}");
        self.write_register_unchecked(fire::RESET_CONTROL, value)?;
        Ok(value)
    }

    /// Drive each target's DL control through the host-side sync values
    ///
    /// Every value is written to every target. A readback mismatch is
    /// recorded in the report and does not stop the sequence. `reads` holds
    /// each target's DL control as it was before the sync.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` before any bus traffic if a target has no
    /// host-configuration block, or the bus error.
    pub fn fire_sync(&mut self, targets: DdimmSet) -> Result<SyncReport> {
        let regs = dl_controls(targets)?;
        let mut report = SyncReport::default();
        for (d, ctl) in regs {
            let before = self.read_register_stable(ctl)?;
            debug!("DDIMM{d} DL control before sync: {before:#x}");
            report.reads.push((ctl, before));
            for value in host_conf::SYNC_SEQUENCE {
                let actual = self.write_readback(ctl, value)?;
                if actual != value {
                    warn!("DDIMM{d} DL control: wrote {value:#x}, read {actual:#x}");
                    report.mismatches.push(SyncMismatch {
                        register: ctl,
                        expected: value,
                        actual,
                    });
                }
            }
            info!("DDIMM{d} host side synced");
        }
        Ok(report)
    }

    /// Link-up bit of each target, checked independently
    ///
    /// A bus error on one target is reported in its slot and does not stop
    /// the others.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` before any bus traffic for targets without a
    /// host-configuration block.
    pub fn fire_check_sync(&mut self, targets: DdimmSet) -> Result<Vec<(Ddimm, Result<bool>)>> {
        let regs = status_regs(targets)?;
        Ok(regs
            .into_iter()
            .map(|(d, status)| {
                let up = self
                    .read_register_stable(status)
                    .map(|v| v & host_conf::LINK_UP != 0);
                match &up {
                    Ok(true) => info!("DDIMM{d} is in sync"),
                    Ok(false) => info!("DDIMM{d} is NOT in sync"),
                    Err(e) => warn!("DDIMM{d} status read failed: {e}"),
                }
                (d, up)
            })
            .collect())
    }

    /// Request a retrain on each target, then report link-up per target
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` before any bus traffic, `WriteVerificationFailed`
    /// if the retrain bit does not stick, or the bus error.
    pub fn retrain(&mut self, targets: DdimmSet) -> Result<Vec<(Ddimm, Result<bool>)>> {
        for (d, ctl) in dl_controls(targets)? {
            let current = self.read_register_stable(ctl)?;
            self.write_register_verified(ctl, current | host_conf::RETRAIN)?;
            info!("DDIMM{d} retrain requested");
        }
        self.fire_check_sync(targets)
    }
}

fn host_conf_regs(
    targets: DdimmSet,
    reg: impl Fn(Ddimm) -> Option<u64>,
) -> Result<Vec<(Ddimm, u64)>> {
    targets
        .iter()
        .map(|d| {
            reg(d)
                .map(|addr| (d, addr))
                .ok_or_else(|| OcapiError::invalid_target(d.letter(), "no host configuration block"))
        })
        .collect()
}

fn dl_controls(targets: DdimmSet) -> Result<Vec<(Ddimm, u64)>> {
    host_conf_regs(targets, Ddimm::dl_control)
}

fn status_regs(targets: DdimmSet) -> Result<Vec<(Ddimm, u64)>> {
    host_conf_regs(targets, Ddimm::status)
}
