//! I2C bus implementations
//!
//! Two backends available:
//! - **Linux**: `/dev/i2c-N` through i2c-dev (real hardware)
//! - **Simulated**: in-process board model (CI, dry runs, wire-format tests)

pub mod linux;
pub mod sim;

pub use linux::LinuxI2c;
pub use sim::{SimulatedBus, Transaction};
