//! DDIMM EEPROM (VPD) layout.
//!
//! The EEPROM behind the DDIMM mux takes a 2-byte big-endian byte offset
//! before every access. Only the few bytes the bring-up reports are mapped.

/// Width of the offset that precedes every access.
pub const OFFSET_BYTES: usize = 2;

/// Bytes shown as the EEPROM header.
pub const HEADER_LEN: u16 = 16;

/// Legacy vendor byte. Changes between parts without naming the vendor.
pub const LEGACY_VENDOR: u16 = 0x001;
/// Module density.
pub const DENSITY: u16 = 0x004;
/// Manufacturer ID, two bytes, big-endian.
pub const MANUFACTURER_ID: u16 = 0x200;

/// Memory size in GB for a density byte.
#[must_use]
pub const fn memory_gb(density: u8) -> Option<u32> {
    match density {
        0x85 => Some(32),
        0x86 => Some(64),
        _ => None,
    }
}

/// DDIMM memory vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// Micron
    Micron,
    /// Samsung
    Samsung,
    /// SMART Modular
    Smart,
    /// IBM (legacy vendor byte only)
    Ibm,
    /// Manufacturer ID not in the table
    Unknown(u16),
}

impl Vendor {
    /// Vendor for a JEDEC manufacturer ID
    #[must_use]
    pub const fn from_manufacturer_id(id: u16) -> Self {
        match id {
            0x802C => Self::Micron,
            0x80CE => Self::Samsung,
            0x0194 => Self::Smart,
            other => Self::Unknown(other),
        }
    }

    /// Vendor named by the legacy vendor byte, if any
    #[must_use]
    pub const fn from_legacy(byte: u8) -> Option<Self> {
        match byte {
            0x09 => Some(Self::Ibm),
            0x04 => Some(Self::Smart),
            _ => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Micron => write!(f, "MICRON"),
            Self::Samsung => write!(f, "SAMSUNG"),
            Self::Smart => write!(f, "SMART"),
            Self::Ibm => write!(f, "IBM"),
            Self::Unknown(id) => write!(f, "unknown ({id:#06x})"),
        }
    }
}
