//! Bus path and DDIMM power
//!
//! Before FIRE can reach a DDIMM's Explorer, the Apollo path mux must be
//! opened, the DDIMM mux pointed at the right port, and the DDIMM PMICs
//! enabled:
//!
//! ```text
//! 0x73 <- 0x01              open path
//! 0x71 <- 1 << port         select DDIMM port (0 = none)
//! (settle)
//! 0x4F, 0x67: [0x32, 0x80]  enable PMIC rails
//! ```

use crate::bus::{Endpoint, I2cBus};
use crate::error::Result;
use ocapi_chip::i2c::{self, PMIC_DISABLE, PMIC_ENABLE, PMIC_ENABLE_CMD};
use std::time::Duration;
use tracing::info;

/// Path/power timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathConfig {
    /// Wait between port selection and PMIC enable
    pub pmic_settle: Duration,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            pmic_settle: Duration::from_secs(2),
        }
    }
}

/// DDIMM port to route the bus to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTarget {
    /// Deselect every port
    None,
    /// DDIMM port A
    A,
    /// DDIMM port B
    B,
}

impl PathTarget {
    /// DDIMM mux value
    pub const fn mux_value(self) -> u8 {
        match self {
            Self::None => 0,
            Self::A => 1 << 0,
            Self::B => 1 << 1,
        }
    }
}

impl std::str::FromStr for PathTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "a" => Ok(Self::A),
            "b" => Ok(Self::B),
            other => Err(format!("unknown path target '{other}' (expected none, a or b)")),
        }
    }
}

/// What the muxes currently route to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Path mux closed
    Disconnected,
    /// Path open, no DDIMM port selected
    NoPort,
    /// Path open to port A
    PortA,
    /// Path open to port B
    PortB,
    /// Mux values outside the known settings
    Unknown {
        /// Path mux value
        path: u8,
        /// DDIMM mux value
        ddimm: u8,
    },
}

impl std::fmt::Display for PathStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "not connected"),
            Self::NoPort => write!(f, "connected, no DDIMM selected"),
            Self::PortA => write!(f, "connected to DDIMM A"),
            Self::PortB => write!(f, "connected to DDIMM B"),
            Self::Unknown { path, ddimm } => {
                write!(f, "unknown (path mux {path:#04x}, DDIMM mux {ddimm:#04x})")
            }
        }
    }
}

fn mux_write<B: I2cBus>(bus: &mut B, mux: u8, value: u8) -> Result<()> {
    let mut ep = Endpoint::open(&mut *bus, mux)?;
    info!("mux {mux:#04x} <- {value:#04x}");
    ep.write(&[value])
}

fn mux_read<B: I2cBus>(bus: &mut B, mux: u8) -> Result<u8> {
    let mut ep = Endpoint::open(&mut *bus, mux)?;
    let mut v = [0u8];
    ep.read(&mut v)?;
    Ok(v[0])
}

/// Enable or disable both DDIMM PMICs
///
/// # Errors
///
/// Returns `DeviceNotPresent` if a PMIC does not answer, or the bus error.
pub fn set_pmics<B: I2cBus>(bus: &mut B, enable: bool) -> Result<()> {
    let value = if enable { PMIC_ENABLE } else { PMIC_DISABLE };
    for pmic in [i2c::PMIC1, i2c::PMIC2] {
        let mut ep = Endpoint::open(&mut *bus, pmic)?;
        info!("PMIC {pmic:#04x} <- {value:#04x}");
        ep.write(&[PMIC_ENABLE_CMD, value])?;
    }
    Ok(())
}

/// Route the bus to a DDIMM port and power it
///
/// # Errors
///
/// Returns `DeviceNotPresent` if a mux or PMIC does not answer, or the bus error.
pub fn setup_path<B: I2cBus>(bus: &mut B, target: PathTarget, config: &PathConfig) -> Result<()> {
    mux_write(bus, i2c::MUX_PATH, 0x01)?;
    mux_write(bus, i2c::MUX_DDIMM, target.mux_value())?;
    if target == PathTarget::None {
        return Ok(());
    }
    std::thread::sleep(config.pmic_settle);
    set_pmics(bus, true)
}

/// Read back where the muxes point
///
/// # Errors
///
/// Returns `DeviceNotPresent` if a mux does not answer, or the bus error.
pub fn path_status<B: I2cBus>(bus: &mut B) -> Result<PathStatus> {
    let path = mux_read(bus, i2c::MUX_PATH)?;
    if path == 0 {
        return Ok(PathStatus::Disconnected);
    }
    let ddimm = mux_read(bus, i2c::MUX_DDIMM)?;
    Ok(match (path, ddimm) {
        (1, 0) => PathStatus::NoPort,
        (1, 1) => PathStatus::PortA,
        (1, 2) => PathStatus::PortB,
        _ => PathStatus::Unknown { path, ddimm },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedBus, Transaction};
    use crate::error::OcapiError;

    fn fast() -> PathConfig {
        PathConfig {
            pmic_settle: Duration::ZERO,
        }
    }

    #[test]
    fn setup_port_b_powers_pmics() {
        let mut sim = SimulatedBus::new();
        setup_path(&mut sim, PathTarget::B, &fast()).unwrap();
        assert_eq!(sim.device_byte(i2c::MUX_PATH), 1);
        assert_eq!(sim.device_byte(i2c::MUX_DDIMM), 2);
        assert_eq!(sim.device_byte(i2c::PMIC1), 0x80);
        assert_eq!(sim.device_byte(i2c::PMIC2), 0x80);
        assert!(sim.transactions().contains(&Transaction::Write {
            address: i2c::PMIC2,
            bytes: vec![0x32, 0x80],
        }));
        assert_eq!(path_status(&mut sim).unwrap(), PathStatus::PortB);
    }

    #[test]
    fn none_leaves_pmics_alone() {
        let mut sim = SimulatedBus::new();
        setup_path(&mut sim, PathTarget::None, &fast()).unwrap();
        assert_eq!(sim.device_byte(i2c::PMIC1), 0);
        assert_eq!(path_status(&mut sim).unwrap(), PathStatus::NoPort);
    }

    #[test]
    fn missing_pmic_is_not_present() {
        let mut sim = SimulatedBus::new().without(i2c::PMIC2);
        let err = setup_path(&mut sim, PathTarget::A, &fast()).unwrap_err();
        assert!(matches!(err, OcapiError::DeviceNotPresent { address: 0x67 }));
    }

    #[test]
    fn status_of_closed_path() {
        let mut sim = SimulatedBus::new();
        assert_eq!(path_status(&mut sim).unwrap(), PathStatus::Disconnected);
        sim.set_device_byte(i2c::MUX_PATH, 1);
        sim.set_device_byte(i2c::MUX_DDIMM, 7);
        assert_eq!(
            path_status(&mut sim).unwrap(),
            PathStatus::Unknown { path: 1, ddimm: 7 }
        );
    }

    #[test]
    fn parse_target() {
        assert_eq!("A".parse::<PathTarget>(), Ok(PathTarget::A));
        assert_eq!("none".parse::<PathTarget>(), Ok(PathTarget::None));
        assert!("c".parse::<PathTarget>().is_err());
    }
}
