//! Explorer / ICE register map and command framing.
//!
//! Explorer is not register-addressed on the wire. Every access is a
//! type-tagged command frame written to the chip, and every answer is a
//! 5-byte response fetched with a block read on command `0x02`:
//!
//! ```text
//! write frame:   [tag] [width] [width bytes, big-endian]
//! response:      [0x04 marker] [4 bytes, big-endian]
//! ```
//!
//! Registers are 32 bits wide unless their logical address carries
//! [`WIDE_FLAG`]; those span two consecutive 32-bit slots (see [`Address`]).

/// Added to every slot address before it goes on the wire.
pub const ADDRESS_OFFSET: u64 = 0xA000_0000;

/// Logical-address bit marking a 64-bit register.
pub const WIDE_FLAG: u32 = 1 << 27;

/// Block-read command that returns the pending response.
pub const RESPONSE_COMMAND: u8 = 0x02;
/// Length of a response, marker byte included.
pub const RESPONSE_LEN: usize = 5;

/// Command type tags (first byte of a write frame). Hardware contract.
pub mod tag {
    /// Direct small-width control write.
    pub const CONTROL: u8 = 1;
    /// Select an address for read.
    pub const SELECT_READ: u8 = 3;
    /// Select an address for write-acknowledge; the next response carries the value.
    pub const FETCH: u8 = 4;
    /// Direct write, address and data in one 8-byte word.
    pub const WRITE: u8 = 5;
}

/// Bits of the response word returned while a control command is running.
pub mod status {
    /// Non-zero while the clock configuration is still in progress.
    pub const BUSY: u64 = 0xFF00;
}

/// Response words ICE returns instead of data.
pub mod sentinel {
    /// The addressed slot has not been mapped by the hardware yet.
    pub const NOT_SET: u64 = 0xDEC0_DE00;
    /// The address is in the AXI window but outside the implemented range.
    pub const OUT_OF_RANGE: u64 = 0xDEC0_DE0B;
}

/// Fixed registers used by the bring-up and identity commands.
pub mod reg {
    /// Control address for the reference clock select; the frequency byte is added.
    pub const CLOCK_SELECT: u64 = 0x8090;
    /// Control address that starts link training; the frequency byte is added.
    pub const TRAINING_START: u64 = 0x8190;
    /// DL0 training status / error register (48 bits used).
    pub const TRAINING_STATUS: u32 = 0x0801_2813;
    /// [`TRAINING_STATUS`] bit set once training is done.
    pub const TRAINING_DONE: u64 = 1 << 39;
    /// Width of the training status register in bits.
    pub const TRAINING_STATUS_BITS: u32 = 48;

    /// Enterprise-mode status.
    pub const ENTERPRISE_MODE: u32 = 0x0020_B080;
    /// First (most significant) ECID word.
    pub const ECID_FIRST: u32 = 0x0020_B0C4;
    /// Last ECID word.
    pub const ECID_LAST: u32 = 0x0020_B090;
    /// Card identifier.
    pub const CARD_ID: u32 = 0x0209_0000;
    /// ICE / Gemini FPGA identification, same slot as the card id.
    pub const ICE_ID: u32 = CARD_ID;

    /// Firmware mailbox status slot, selected after firmware-info priming.
    pub const FW_MAILBOX: u64 = 0x2058;
}

// ── Address transform ────────────────────────────────────────────────────────

/// A logical Explorer register address, classified once.
///
/// A wide register lives at `((addr & !WIDE_FLAG) << 3) | WIDE_FLAG` (high
/// half) and four bytes above it (low half). Bit 24 of a wide logical address
/// lands on the flag after the shift, so addresses with bit 24 set do not
/// survive [`Address::from_base`]. No Explorer register uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// 32-bit register; one slot at the logical address.
    Narrow(u32),
    /// 64-bit register; holds the logical address (flag included).
    Wide(u32),
}

impl Address {
    /// Classify a logical address.
    #[must_use]
    pub const fn new(logical: u32) -> Self {
        if logical & WIDE_FLAG == 0 {
            Self::Narrow(logical)
        } else {
            Self::Wide(logical)
        }
    }

    /// The logical address this was built from.
    #[must_use]
    pub const fn logical(self) -> u32 {
        match self {
            Self::Narrow(a) | Self::Wide(a) => a,
        }
    }

    /// Whether the register spans two slots.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Wide(_))
    }

    /// Slot address of the only (narrow) or high (wide) half.
    #[must_use]
    pub const fn base(self) -> u64 {
        match self {
            Self::Narrow(a) => a as u64,
            Self::Wide(a) => (((a & !WIDE_FLAG) as u64) << 3) | WIDE_FLAG as u64,
        }
    }

    /// Slot addresses in access order: high half first for wide registers.
    pub fn slots(self) -> impl Iterator<Item = u64> {
        let base = self.base();
        let count = if self.is_wide() { 2 } else { 1 };
        (0..count).map(move |i| base + 4 * i)
    }

    /// Recover the logical address from a base slot address.
    ///
    /// Returns `None` for a flagged base whose low three bits are set,
    /// or whose logical address would not fit 32 bits.
    #[must_use]
    pub fn from_base(base: u64) -> Option<Self> {
        let flag = u64::from(WIDE_FLAG);
        if base & flag == 0 {
            return u32::try_from(base).ok().map(Self::Narrow);
        }
        let shifted = base & !flag;
        if shifted & 0x7 != 0 {
            return None;
        }
        let logical = u32::try_from(shifted >> 3).ok()?;
        Some(Self::Wide(logical | WIDE_FLAG))
    }
}

impl From<u32> for Address {
    fn from(logical: u32) -> Self {
        Self::new(logical)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.logical())
    }
}

/// Bus-side address of a slot.
#[must_use]
pub const fn bus_address(slot: u64) -> u64 {
    ADDRESS_OFFSET.wrapping_add(slot)
}

// ── Link frequency ───────────────────────────────────────────────────────────

/// OpenCAPI link frequencies the Explorer clock block can be set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkFrequency {
    /// 333 MHz reference (25.6 Gb/s lanes).
    Mhz333,
    /// 400 MHz reference.
    Mhz400,
}

impl LinkFrequency {
    /// Map a MHz figure to a supported frequency.
    #[must_use]
    pub const fn from_mhz(mhz: u32) -> Option<Self> {
        match mhz {
            333 => Some(Self::Mhz333),
            400 => Some(Self::Mhz400),
            _ => None,
        }
    }

    /// Frequency in MHz.
    #[must_use]
    pub const fn mhz(self) -> u32 {
        match self {
            Self::Mhz333 => 333,
            Self::Mhz400 => 400,
        }
    }

    /// Byte added to [`reg::CLOCK_SELECT`] and [`reg::TRAINING_START`].
    #[must_use]
    pub const fn select_byte(self) -> u64 {
        match self {
            Self::Mhz333 => 0x1,
            Self::Mhz400 => 0x3,
        }
    }
}

impl std::fmt::Display for LinkFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} MHz", self.mhz())
    }
}

// ── Training sequence ────────────────────────────────────────────────────────

/// One step of the Explorer training sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    /// Double-register read; the value is only logged.
    Read(u32),
    /// Verified double-register write.
    Write(u32, u64),
}

/// The Explorer side of link training, in hardware order.
///
/// Several writes arm one-shot state machines consumed by the next access.
/// Values are taken from a working bring-up and must not be reordered.
pub const SYNC_SEQUENCE: &[SyncStep] = &[
    SyncStep::Read(0x0804_0010),
    SyncStep::Read(0x0804_0011),
    SyncStep::Read(0x0801_2406),
    SyncStep::Read(0x0801_2407),
    SyncStep::Read(0x0801_2806),
    SyncStep::Read(0x0801_2807),
    SyncStep::Read(0x0804_0017),
    // lane enables and PHY config
    SyncStep::Write(0x0804_0017, 0xF800_0000_0000_0000),
    SyncStep::Write(0x0804_0010, 0x0000_0000_0000_0000),
    SyncStep::Write(0x0804_0011, 0xFFFF_FFFF_FFFF_FFFF),
    SyncStep::Write(0x0804_000E, 0xFFFF_F59E_7E01_FFFF),
    SyncStep::Write(0x0801_2406, 0x0000_0000_0000_0000),
    SyncStep::Write(0x0801_2407, 0x8000_0000_0000_0000),
    SyncStep::Write(0x0801_2404, 0x00FF_FFFF_FFFF_FFFF),
    SyncStep::Write(0x0801_2803, 0xFFFF_FFFF_FFFF_FFFF),
    SyncStep::Write(0x0801_2806, 0x0000_0000_0000_0000),
    SyncStep::Write(0x0801_2807, 0x0560_0000_0000_0000),
    SyncStep::Write(0x0801_2804, 0x3A9F_FFFF_FFFF_FFFF),
    SyncStep::Read(0x0801_2812),
    SyncStep::Write(0x0801_2812, 0x0000_FFD1_0004_0000),
    SyncStep::Read(0x0804_0002),
    SyncStep::Write(0x0804_0002, 0x6627_FFE0_0000_0000),
    SyncStep::Read(0x0804_0007),
    SyncStep::Write(0x0804_0007, 0x0000_0000_0000_0000),
    SyncStep::Write(0x0801_08E4, 0x0000_0000_0000_0000),
    SyncStep::Read(0x0801_08E4),
    // DL config
    SyncStep::Read(0x0801_2811),
    SyncStep::Write(0x0801_2811, 0x0000_0500_0000_006F),
    SyncStep::Read(0x0801_2810),
    SyncStep::Write(0x0801_2810, 0x8122_6407_0011_2620),
    SyncStep::Read(0x0801_2811),
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wide_transform_matches_hardware() {
        let a = Address::new(0x0801_2813);
        assert!(a.is_wide());
        assert_eq!(a.base(), 0x0809_4098);
        assert_eq!(bus_address(a.base()), 0xA809_4098);
        assert_eq!(a.slots().collect::<Vec<_>>(), vec![0x0809_4098, 0x0809_409C]);
    }

    #[test]
    fn narrow_is_untouched() {
        let a = Address::new(0x0020_B080);
        assert_eq!(a, Address::Narrow(0x0020_B080));
        assert_eq!(a.base(), 0x0020_B080);
        assert_eq!(a.slots().count(), 1);
        assert_eq!(Address::from_base(a.base()), Some(a));
    }

    #[test]
    fn misaligned_wide_base_rejected() {
        assert_eq!(Address::from_base(0x0809_4099), None);
    }

    #[test]
    fn frequency_select() {
        assert_eq!(LinkFrequency::from_mhz(333).map(LinkFrequency::select_byte), Some(0x1));
        assert_eq!(LinkFrequency::from_mhz(400).map(LinkFrequency::select_byte), Some(0x3));
        assert_eq!(LinkFrequency::from_mhz(250), None);
    }

    #[test]
    fn sync_sequence_shape() {
        let writes = SYNC_SEQUENCE.iter().filter(|s| matches!(s, SyncStep::Write(..))).count();
        assert_eq!(SYNC_SEQUENCE.len(), 31);
        assert_eq!(writes, 17);
        assert_eq!(SYNC_SEQUENCE.first(), Some(&SyncStep::Read(0x0804_0010)));
        assert_eq!(SYNC_SEQUENCE.last(), Some(&SyncStep::Read(0x0801_2811)));
        // every step targets a wide register
        assert!(SYNC_SEQUENCE.iter().all(|s| match *s {
            SyncStep::Read(a) | SyncStep::Write(a, _) => Address::new(a).is_wide(),
        }));
    }

    proptest! {
        #[test]
        fn wide_address_round_trips(raw in any::<u32>()) {
            // bit 24 aliases the flag once shifted
            let logical = (raw | WIDE_FLAG) & !(1 << 24);
            let a = Address::new(logical);
            prop_assert!(a.is_wide());
            prop_assert_eq!(Address::from_base(a.base()), Some(a));
            prop_assert_eq!(Address::new(a.logical()), a);
        }
    }
}
