//! DDIMM targets behind FIRE.
//!
//! FIRE drives up to four DDIMM ports (A–D) plus the W slot. Each has a bit
//! in [`RESET_CONTROL`](crate::fire::RESET_CONTROL); ports A–D also own a
//! host-configuration block.

use crate::fire::host_conf;

/// A DDIMM target, named by its letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ddimm {
    /// Port A.
    A,
    /// Port B.
    B,
    /// Port C.
    C,
    /// Port D.
    D,
    /// W slot (reset bit only).
    W,
}

impl Ddimm {
    /// All targets in canonical order.
    pub const ALL: [Self; 5] = [Self::A, Self::B, Self::C, Self::D, Self::W];

    /// Parse a target letter, case-insensitive.
    #[must_use]
    pub const fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'a' => Some(Self::A),
            'b' => Some(Self::B),
            'c' => Some(Self::C),
            'd' => Some(Self::D),
            'w' => Some(Self::W),
            _ => None,
        }
    }

    /// Upper-case letter.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::W => 'W',
        }
    }

    /// Bit in the reset-control register.
    #[must_use]
    pub const fn reset_bit(self) -> u64 {
        match self {
            Self::A => 1 << 3,
            Self::B => 1 << 2,
            Self::C => 1 << 1,
            Self::D => 1 << 0,
            Self::W => 1 << 4,
        }
    }

    /// Host-configuration block base, `None` for W.
    #[must_use]
    pub const fn host_conf_base(self) -> Option<u64> {
        match self {
            Self::A => Some(host_conf::BASE_A),
            Self::B => Some(host_conf::BASE_B),
            Self::C => Some(host_conf::BASE_C),
            Self::D => Some(host_conf::BASE_D),
            Self::W => None,
        }
    }

    /// DL control register of this target.
    #[must_use]
    pub const fn dl_control(self) -> Option<u64> {
        match self.host_conf_base() {
            Some(base) => Some(base + host_conf::DL_CONTROL),
            None => None,
        }
    }

    /// Host-configuration status register of this target.
    #[must_use]
    pub const fn status(self) -> Option<u64> {
        match self.host_conf_base() {
            Some(base) => Some(base + host_conf::STATUS),
            None => None,
        }
    }

    const fn index(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
            Self::W => 4,
        }
    }
}

impl std::fmt::Display for Ddimm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Reset direction for [`apply_reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    /// Hold in reset: clear the target bit.
    On,
    /// Release from reset: set the target bit.
    Off,
}

/// Apply a reset change for `targets` to a reset-control value.
///
/// Bits of targets not in the set are left untouched.
#[must_use]
pub fn apply_reset(value: u64, state: ResetState, targets: DdimmSet) -> u64 {
    let mask = targets.iter().fold(0, |m, t| m | t.reset_bit());
    match state {
        ResetState::On => value & !mask,
        ResetState::Off => value | mask,
    }
}

// ── Target sets ──────────────────────────────────────────────────────────────

/// A set of DDIMM targets, iterated in canonical order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DdimmSet(u8);

impl DdimmSet {
    /// Empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a target.
    #[must_use]
    pub const fn with(self, d: Ddimm) -> Self {
        Self(self.0 | 1 << d.index())
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, d: Ddimm) -> bool {
        self.0 & (1 << d.index()) != 0
    }

    /// True when no target is selected.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Targets in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Ddimm> {
        Ddimm::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Ddimm> for DdimmSet {
    fn from_iter<I: IntoIterator<Item = Ddimm>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl std::fmt::Display for DdimmSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for d in self.iter() {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Rejected target letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseDdimmError(pub char);

impl std::fmt::Display for ParseDdimmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown DDIMM target '{}' (expected a, b, c, d or w)", self.0)
    }
}

impl std::error::Error for ParseDdimmError {}

impl std::str::FromStr for DdimmSet {
    type Err = ParseDdimmError;

    /// Parse letters such as `"ab"` or `"W"`. Separators are not accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .map(|c| Ddimm::from_letter(c).ok_or(ParseDdimmError(c)))
            .collect()
    }
}
