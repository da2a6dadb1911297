//! FIRE register map.
//!
//! FIRE exposes a flat 64-bit register space over I2C. The top bytes of an
//! address select the functional block:
//!
//! ```text
//! 0x0100_0000_0000_0000  FML   : version, reset control, LEDs, DDIMM detect
//! 0x0104_0000_0000_0000  Host configuration, one 0x0400_0000_0000 block per DDIMM
//! ```
//!
//! Every address and data word travels as 8 big-endian bytes.

// ── Blocks ───────────────────────────────────────────────────────────────────

/// FML block base.
pub const FML_BASE: u64 = 0x0100_0000_0000_0000;

// ── FML registers ────────────────────────────────────────────────────────────

/// Bitstream version / ID register.
pub const VERSION: u64 = FML_BASE + 0x00;
/// DDIMM reset control. A cleared bit holds the DDIMM in reset.
pub const RESET_CONTROL: u64 = FML_BASE + 0x04;
/// LED control.
pub const LED_CONTROL: u64 = FML_BASE + 0x08;
/// LED override enables.
pub const LED_OVERRIDE: u64 = FML_BASE + 0x0C;
/// DDIMM presence detect.
pub const DDIMM_DETECT: u64 = FML_BASE + 0x20;

/// Value FIRE returns for an address that decodes to no register.
pub const REG_NOT_FOUND: u64 = 0xDEC0_DE1C;

/// Bits of the [`VERSION`] register.
pub mod id {
    /// Bitstream was built from a dirty tree.
    pub const DIRTY: u64 = 1 << 28;
    /// Frequency definition field.
    pub const FREQ_DEF: u64 = 7 << 29;
    /// [`FREQ_DEF`] value for a 400 MHz build.
    pub const FREQ_400_MHZ: u64 = 3;
    /// Bits that identify the bitstream build.
    pub const BUILD_MASK: u64 = 0x0FFF_FFFF;

    /// Bitstream IDs built for a 400 MHz link.
    pub const BUILDS_400_MHZ: &[u64] = &[0xB20B168, 0x90AD53D, 0xA032D32, 0x93A2CD0];
    /// Bitstream IDs built for a 333 MHz link.
    pub const BUILDS_333_MHZ: &[u64] = &[0x5CD07BE, 0xE525BAD, 0xB20B168];
}

// ── Host configuration (per DDIMM) ───────────────────────────────────────────

/// Per-DDIMM host configuration blocks and their fields.
pub mod host_conf {
    /// Host configuration base for DDIMM A.
    pub const BASE_A: u64 = 0x0104_0000_0000_0000;
    /// Host configuration base for DDIMM B.
    pub const BASE_B: u64 = 0x0104_0400_0000_0000;
    /// Host configuration base for DDIMM C.
    pub const BASE_C: u64 = 0x0104_0800_0000_0000;
    /// Host configuration base for DDIMM D.
    pub const BASE_D: u64 = 0x0104_0C00_0000_0000;

    /// OpenCAPI DL control register, relative to a block base.
    pub const DL_CONTROL: u64 = 0x10;
    /// Host configuration status register, relative to a block base.
    pub const STATUS: u64 = 0x20;

    /// Status bit: the DL link is up.
    pub const LINK_UP: u64 = 1 << 3;
    /// DL control bit: request a retrain.
    pub const RETRAIN: u64 = 1 << 24;

    /// DL control values written, in order, to start host-side training.
    pub const SYNC_SEQUENCE: [u64; 2] = [0x0000_0000_0401_0045, 0x0000_0000_0408_0045];
}

/// Link frequency FIRE was built for, inferred from its bitstream ID.
///
/// IDs listed for both frequencies resolve to 400 MHz.
#[must_use]
pub fn link_mhz(version: u64) -> u32 {
    if id::BUILDS_400_MHZ.contains(&(version & id::BUILD_MASK)) {
        400
    } else {
        333
    }
}

/// Whether the build bits of `version` are in either frequency list.
#[must_use]
pub fn is_known_build(version: u64) -> bool {
    let build = version & id::BUILD_MASK;
    id::BUILDS_400_MHZ.contains(&build) || id::BUILDS_333_MHZ.contains(&build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fml_offsets() {
        assert_eq!(VERSION, 0x0100_0000_0000_0000);
        assert_eq!(RESET_CONTROL, 0x0100_0000_0000_0004);
        assert_eq!(DDIMM_DETECT, 0x0100_0000_0000_0020);
    }

    #[test]
    fn host_conf_blocks_are_disjoint() {
        let bases = [host_conf::BASE_A, host_conf::BASE_B, host_conf::BASE_C, host_conf::BASE_D];
        for pair in bases.windows(2) {
            assert!(pair[1] - pair[0] > host_conf::STATUS);
        }
    }

    #[test]
    fn frequency_from_build() {
        assert_eq!(link_mhz(0x090A_D53D), 400);
        assert_eq!(link_mhz(0x1000_0000 | 0x0A03_2D32), 400);
        assert_eq!(link_mhz(0x05CD_07BE), 333);
        assert_eq!(link_mhz(0), 333);
    }

    #[test]
    fn known_builds() {
        assert!(is_known_build(0x05CD_07BE));
        assert!(is_known_build(id::DIRTY | 0x093A_2CD0));
        assert!(!is_known_build(0x0123_4567));
    }
}
