//! I2C addresses of the devices reachable from the host bus.
//!
//! ```text
//! Addr  Device
//! ────  ───────────────────────────────────────────────
//! 0x20  Explorer / ICE (behind the DDIMM mux)
//! 0x38  FIRE FPGA
//! 0x4F  DDIMM PMIC1
//! 0x50  DDIMM SPD EEPROM
//! 0x64  UDC90120A power controller (Gemini cards only)
//! 0x67  DDIMM PMIC2
//! 0x70  Apollo first-level mux
//! 0x71  DDIMM port mux
//! 0x73  Apollo16 path mux
//! ```

use std::ops::Range;

/// FIRE host bridge.
pub const FIRE: u8 = 0x38;
/// Explorer / ICE buffer chip.
pub const EXPLORER: u8 = 0x20;

/// Apollo first-level switch.
pub const MUX_APOLLO: u8 = 0x70;
/// Path switch that makes the DDIMM mux visible.
pub const MUX_PATH: u8 = 0x73;
/// DDIMM port switch (one bit per port).
pub const MUX_DDIMM: u8 = 0x71;

/// First DDIMM power-management IC.
pub const PMIC1: u8 = 0x4F;
/// Second DDIMM power-management IC.
pub const PMIC2: u8 = 0x67;
/// DDIMM SPD EEPROM.
pub const EEPROM: u8 = 0x50;
/// UDC90120A power controller.
pub const POWER_CTRL: u8 = 0x64;

/// Addresses probed by a bus scan (general-call and reserved high range excluded).
pub const SCAN_RANGE: Range<u8> = 1..127;

/// PMIC command register that holds the regulator enable bit.
pub const PMIC_ENABLE_CMD: u8 = 0x32;
/// Value written to [`PMIC_ENABLE_CMD`] to power the DDIMM rails.
pub const PMIC_ENABLE: u8 = 0x80;
/// Value written to [`PMIC_ENABLE_CMD`] to drop the DDIMM rails.
pub const PMIC_DISABLE: u8 = 0x00;

/// A device we know how to name on a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    /// 7-bit bus address.
    pub address: u8,
    /// Human-readable name.
    pub name: &'static str,
}

/// Every device the carrier is known to expose.
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice { address: EXPLORER,   name: "EXPLORER/ICE" },
    KnownDevice { address: FIRE,       name: "FIRE" },
    KnownDevice { address: MUX_APOLLO, name: "Apollo First Level Switch/Mux/Selector" },
    KnownDevice { address: MUX_PATH,   name: "Dummy Switch/Mux/Selector for Apollo16 Config" },
    KnownDevice { address: MUX_DDIMM,  name: "DDIMM Switch/Mux/Selector" },
    KnownDevice { address: EEPROM,     name: "EEPROM" },
    KnownDevice { address: POWER_CTRL, name: "UDC90120A Power Controller" },
    KnownDevice { address: PMIC1,      name: "PMIC1" },
    KnownDevice { address: PMIC2,      name: "PMIC2" },
];

/// Look up a known device by address.
#[must_use]
pub fn lookup(address: u8) -> Option<&'static KnownDevice> {
    KNOWN_DEVICES.iter().find(|d| d.address == address)
}

/// Card plugged behind the DDIMM mux, inferred from which power devices answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardKind {
    /// Explorer DDIMM: two PMICs.
    Ddimm,
    /// ICE/Gemini card: single UDC90120A controller, rails start by themselves.
    Gemini,
    /// Nothing recognisable.
    Unknown,
}

impl CardKind {
    /// Classify a card from the set of addresses that answered a probe.
    #[must_use]
    pub fn from_alive(alive: &[u8]) -> Self {
        // PMIC2 wins if both show up, matching the scan order of the bring-up scripts.
        if alive.contains(&PMIC2) {
            Self::Ddimm
        } else if alive.contains(&POWER_CTRL) {
            Self::Gemini
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for CardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ddimm => write!(f, "DDIMM"),
            Self::Gemini => write!(f, "GEMINI"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
