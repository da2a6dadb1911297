//! I2C register protocols and link training for FIRE and Explorer/ICE.
//!
//! FIRE (the host-side FPGA) and Explorer (the OpenCAPI memory buffer on
//! each DDIMM) are both reached over one I2C adapter. This crate speaks
//! both register protocols and sequences OpenCAPI link training.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   LinuxI2c      : /dev/i2c-N, I2C_RDWR + SMBus quick probe
//!
//! Development:
//!   SimulatedBus  : in-memory board model (FIRE, Explorer, muxes, PMICs, EEPROM)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use ocapi_driver::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut fire = FireBus::open(LinuxI2c::open(3)?)?;
//! let fid = fire.chip_id()?;
//! println!("{fid}");
//!
//! let config = TrainingConfig::new(fid.frequency());
//! let mut explorer = ExplorerLink::open(LinuxI2c::open(3)?, config.frequency)?;
//! explorer.init(&config.poll)?;
//!
//! let mut trainer = LinkTrainer::new(explorer, fire, config);
//! let outcome = trainer.run("a".parse()?)?;
//! println!("done: {}", outcome.training.done());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unreadable_literal)]

pub mod backends;
mod bus;
pub mod codec;
mod discovery;
mod eeprom;
mod error;
mod explorer;
mod fire;
pub mod path;
mod training;

/// Register maps and board constants (re-exported from ocapi-chip).
pub mod chip {
    pub use ocapi_chip::catalog;
    pub use ocapi_chip::ddimm::{Ddimm, DdimmSet, ParseDdimmError, ResetState};
    pub use ocapi_chip::eeprom::Vendor;
    pub use ocapi_chip::explorer::{Address, LinkFrequency};
    pub use ocapi_chip::i2c;
}

pub use backends::{LinuxI2c, SimulatedBus, Transaction};
pub use bus::{open_bus, BusSelection, BusType, Endpoint, I2cBus};
pub use discovery::{scan, ScanResult};
pub use eeprom::{DdimmInfo, Eeprom};
pub use error::{OcapiError, Result};
pub use explorer::{ExplorerBus, ExplorerIdentity, IceId};
pub use fire::{FireBus, FireId};
pub use path::{path_status, setup_path, PathConfig, PathStatus, PathTarget};
pub use training::{
    ExplorerLink, LinkOutcome, LinkState, LinkTrainer, PollConfig, SyncMismatch, SyncReport,
    TrainingConfig, TrainingReport,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::chip::{Ddimm, DdimmSet, LinkFrequency, ResetState};
    pub use crate::{
        ExplorerBus, ExplorerLink, FireBus, I2cBus, LinkTrainer, LinuxI2c, OcapiError, Result,
        SimulatedBus, TrainingConfig,
    };
}
