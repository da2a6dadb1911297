//! Bus scan
//!
//! Probes every 7-bit address and names what it recognises. The card type
//! behind the DDIMM mux follows from which power devices answered.

use crate::bus::I2cBus;
use crate::error::Result;
use ocapi_chip::i2c::{self, CardKind, SCAN_RANGE};

/// Addresses that acknowledged a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Responding addresses, ascending
    pub alive: Vec<u8>,
    /// Card classification
    pub card: CardKind,
}

impl ScanResult {
    /// Responding addresses with their known names
    pub fn devices(&self) -> impl Iterator<Item = (u8, Option<&'static str>)> + '_ {
        self.alive
            .iter()
            .map(|&a| (a, i2c::lookup(a).map(|d| d.name)))
    }

    /// Whether `address` answered
    pub fn contains(&self, address: u8) -> bool {
        self.alive.contains(&address)
    }
}

/// Probe the whole address range
///
/// # Errors
///
/// Returns an error only if the adapter fails; silent addresses are skipped.
pub fn scan<B: I2cBus>(bus: &mut B) -> Result<ScanResult> {
    tracing::info!("Scanning {} bus...", bus.bus_type());

    let mut alive = Vec::new();
    for address in SCAN_RANGE {
        if bus.probe(address)? {
            tracing::debug!("{address:#04x} answered");
            alive.push(address);
        }
    }

    let card = CardKind::from_alive(&alive);
    tracing::info!("{} devices, card {card}", alive.len());
    Ok(ScanResult { alive, card })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;

    #[test]
    fn scan_full_board() {
        let mut sim = SimulatedBus::new();
        let result = scan(&mut sim).unwrap();
        assert_eq!(result.card, CardKind::Ddimm);
        assert!(result.contains(i2c::FIRE));
        assert!(result.contains(i2c::EXPLORER));
        assert!(result.devices().all(|(_, name)| name.is_some()));
        assert_eq!(sim.transactions().len(), SCAN_RANGE.len());
    }

    #[test]
    fn scan_gemini_card() {
        let mut sim = SimulatedBus::new()
            .without(i2c::PMIC1)
            .without(i2c::PMIC2)
            .with_device(i2c::POWER_CTRL);
        assert_eq!(scan(&mut sim).unwrap().card, CardKind::Gemini);
    }

    #[test]
    fn unknown_addresses_listed_unnamed() {
        let mut sim = SimulatedBus::new().with_device(0x11);
        let result = scan(&mut sim).unwrap();
        assert!(result.devices().any(|d| d == (0x11, None)));
    }
}
