//! Named registers and error-bit descriptors.
//!
//! Presentation only: nothing here is used to compute an address.

use crate::explorer::ADDRESS_OFFSET;

/// A register with a human-readable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedRegister {
    /// Bus-side address (Explorer offset already applied).
    pub address: u64,
    /// Label printed next to the value.
    pub label: &'static str,
}

impl NamedRegister {
    const fn fw(offset: u64, label: &'static str) -> Self {
        Self { address: ADDRESS_OFFSET + 0x0102_FF00 + offset, label }
    }
}

// ── Firmware information block ───────────────────────────────────────────────

/// Number of firmware images.
pub const NUM_IMAGES: NamedRegister = NamedRegister::fw(0x00, "FW number of images");
/// Active partition.
pub const PARTITION_ID: NamedRegister = NamedRegister::fw(0x04, "Partition ID");
/// Partition A version fields.
pub const MAJOR_A: NamedRegister = NamedRegister::fw(0x08, "Major (Boot Partion A)");
#[allow(missing_docs)]
pub const MINOR_A: NamedRegister = NamedRegister::fw(0x0C, "Minor (Boot Partion A)");
#[allow(missing_docs)]
pub const BUILD_PATCH_A: NamedRegister = NamedRegister::fw(0x10, "Build patch (Boot Partion A)");
#[allow(missing_docs)]
pub const BUILD_NUMBER_A: NamedRegister = NamedRegister::fw(0x14, "Build number (Boot Partion A)");
#[allow(missing_docs)]
pub const BUILD_DATE_A: NamedRegister = NamedRegister::fw(0x18, "Build date (Boot Partion A)");
/// Partition B version fields.
pub const MAJOR_B: NamedRegister = NamedRegister::fw(0x1C, "Major (Boot Partion B)");
#[allow(missing_docs)]
pub const MINOR_B: NamedRegister = NamedRegister::fw(0x20, "Minor (Boot Partion B)");
#[allow(missing_docs)]
pub const BUILD_PATCH_B: NamedRegister = NamedRegister::fw(0x24, "Build patch (Boot Partion B)");
#[allow(missing_docs)]
pub const BUILD_NUMBER_B: NamedRegister = NamedRegister::fw(0x28, "Build number (Boot Partion B)");
#[allow(missing_docs)]
pub const BUILD_DATE_B: NamedRegister = NamedRegister::fw(0x2C, "Build date (Boot Partion B)");
/// Firmware RAM size.
pub const RAM_SIZE: NamedRegister = NamedRegister::fw(0x30, "RAM size (in bytes)");
/// Silicon revision.
pub const CHIP_VERSION: NamedRegister = NamedRegister::fw(0x34, "Chip version");
/// SPI flash geometry.
pub const SPI_FLASH_ID: NamedRegister = NamedRegister::fw(0x38, "SPI flash ID");
#[allow(missing_docs)]
pub const SPI_FLASH_SECTOR_SIZE: NamedRegister = NamedRegister::fw(0x3C, "SPI flash sector size");
#[allow(missing_docs)]
pub const SPI_FLASH_SIZE: NamedRegister = NamedRegister::fw(0x40, "SPI flash size");
/// Error log size.
pub const ERROR_BUFFER_SIZE: NamedRegister = NamedRegister::fw(0x44, "Error buffer size");
/// Booted image.
pub const IMAGE_INDEX: NamedRegister = NamedRegister::fw(0x48, "Image index");

/// Firmware-info registers in dump order.
pub const FIRMWARE_REGISTERS: [NamedRegister; 19] = [
    NUM_IMAGES,
    PARTITION_ID,
    MAJOR_A,
    MINOR_A,
    BUILD_PATCH_A,
    BUILD_NUMBER_A,
    BUILD_DATE_A,
    MAJOR_B,
    MINOR_B,
    BUILD_PATCH_B,
    BUILD_NUMBER_B,
    BUILD_DATE_B,
    RAM_SIZE,
    CHIP_VERSION,
    SPI_FLASH_ID,
    SPI_FLASH_SECTOR_SIZE,
    SPI_FLASH_SIZE,
    ERROR_BUFFER_SIZE,
    IMAGE_INDEX,
];

/// Raw `WRITE` words that wake the firmware mailbox before the dump.
///
/// Each is sent as an 8-byte tag-5 frame with [`ADDRESS_OFFSET`] added to
/// the upper word, followed by one response read.
pub const FIRMWARE_PRIMING: [u64; 21] = [
    0x0808_4738_8000_0000,
    0x0808_473C_0000_0000,
    0x0000_2058_0000_0001,
    0x0103_FF40_4241_0007,
    0x0103_FF44_0000_0000,
    0x0103_FF48_FFFF_FFFF,
    0x0103_FF4C_0000_0000,
    0x0103_FF50_0000_0000,
    0x0103_FF54_0000_0000,
    0x0103_FF58_0000_0000,
    0x0103_FF5C_0000_0000,
    0x0103_FF60_0000_0000,
    0x0103_FF64_0000_0000,
    0x0103_FF68_0000_0000,
    0x0103_FF6C_0000_0000,
    0x0103_FF70_0000_0000,
    0x0103_FF74_0000_0000,
    0x0103_FF78_0000_0000,
    0x0103_FF7C_3932_F901,
    0x0808_4730_8000_0000,
    0x0808_4734_0000_0000,
];

/// Double-register writes that hand the mailbox back after the dump.
pub const FIRMWARE_RESTORE: [(u32, u64); 2] = [
    (0x0801_08E7, 0x8000_0000_0000_0000),
    (0x0000_2058, 0x0000_0000_0000_0001),
];

// ── DL0 error bits ───────────────────────────────────────────────────────────

/// One bit of the DL0 training status / error register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBit {
    /// Bit index, 0..48.
    pub bit: u8,
    /// Description.
    pub label: &'static str,
}

const fn eb(bit: u8, label: &'static str) -> ErrorBit {
    ErrorBit { bit, label }
}

const EDPL: &str = "EDPL parity error on lane";
const REMOTE: &str = "Remote link error bit";

/// Descriptors for all 48 bits, indexed by bit number.
pub const ERROR_BITS: [ErrorBit; 48] = [
    eb(0, "UE on control flit frame buffer"),
    eb(1, "UE on control flit replay buffer"),
    eb(2, "Ack pointer overflow"),
    eb(3, "Illegal run length from TL"),
    eb(4, "Truncated flit from TL"),
    eb(5, "Data parity error"),
    eb(6, "Control parity error"),
    eb(7, "RX receiving illegal run length"),
    eb(8, "RX receiving slow"),
    eb(9, "Illegal Tx Lane reversal request"),
    eb(10, "Flit Hammer. Detected a possible DI and brought the link down to prevent the potential data corruption"),
    eb(11, "Spare"),
    eb(12, "ECC UE on data flit frame buffer"),
    eb(13, "ECC UE on data flit replay buffer"),
    eb(14, "ECC CE error frame buffer"),
    eb(15, "ECC CE error replay buffer"),
    eb(16, "CRC error detected"),
    eb(17, "NACK received"),
    eb(18, "TX side in x4 mode"),
    eb(19, "RX side in x4 mode"),
    eb(20, EDPL),
    eb(21, EDPL),
    eb(22, EDPL),
    eb(23, EDPL),
    eb(24, EDPL),
    eb(25, EDPL),
    eb(26, EDPL),
    eb(27, EDPL),
    eb(28, "Spare"),
    eb(29, "Tx_Flit macro detected a reason to retrain the link. Look at CYA Error for details"),
    eb(30, "No forward progress timeout"),
    eb(31, "Remote side started retraining"),
    eb(32, "Software retrain"),
    eb(33, "Lost block lock"),
    eb(34, "Deskew overflow"),
    eb(35, "Received illegal sync header"),
    eb(36, "EDPL threshold reached"),
    eb(37, "RX performance threshold breached"),
    eb(38, "TX performance threshold breached"),
    eb(39, "Training Done"),
    eb(40, REMOTE),
    eb(41, REMOTE),
    eb(42, REMOTE),
    eb(43, REMOTE),
    eb(44, REMOTE),
    eb(45, REMOTE),
    eb(46, REMOTE),
    eb(47, "A write to bit 0 will reset register, a read will reset register if bit 44 is set in config1 register"),
];

/// Descriptors of every set bit in `status`, lowest bit first.
pub fn set_bits(status: u64) -> impl Iterator<Item = &'static ErrorBit> {
    ERROR_BITS.iter().filter(move |e| status & (1u64 << e.bit) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_block_is_contiguous() {
        assert_eq!(NUM_IMAGES.address, 0xA102_FF00);
        for (i, r) in FIRMWARE_REGISTERS.iter().enumerate() {
            assert_eq!(r.address, 0xA102_FF00 + 4 * i as u64, "{}", r.label);
        }
        assert_eq!(IMAGE_INDEX.address, 0xA102_FF48);
    }

    #[test]
    fn error_bits_indexed_by_position() {
        for (i, e) in ERROR_BITS.iter().enumerate() {
            assert_eq!(usize::from(e.bit), i);
        }
        assert_eq!(ERROR_BITS[39].label, "Training Done");
    }

    #[test]
    fn decode_status() {
        let bits: Vec<u8> = set_bits((1 << 39) | (1 << 16) | 1).map(|e| e.bit).collect();
        assert_eq!(bits, vec![0, 16, 39]);
        assert_eq!(set_bits(0).count(), 0);
        // above the 48-bit field
        assert_eq!(set_bits(1 << 60).count(), 0);
    }
}
