//! Link-training sequencer
//!
//! ```text
//! open → Probed → ClockConfigured → TrainingArmed → TrainingComplete
//!                                                 ↘ TrainingFailed
//! ```
//!
//! A link only exists once Explorer has answered its probe, so there is no
//! state before `Probed`. `sync` is refused unless the clock is configured.
//!
//! Every step is a fixed, ordered list of register accesses. A sequence that
//! fails part way leaves the link in an undefined intermediate state; nothing
//! here retries or rolls back.

use crate::bus::I2cBus;
use crate::error::{OcapiError, Result};
use crate::explorer::ExplorerBus;
use crate::fire::FireBus;
use ocapi_chip::catalog::{self, ErrorBit};
use ocapi_chip::ddimm::{Ddimm, DdimmSet};
use ocapi_chip::explorer::{reg, LinkFrequency, SyncStep, SYNC_SEQUENCE};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounds for the Explorer clock-configuration poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Sleep between polls
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(10),
        }
    }
}

/// Training configuration
///
/// The settle delays are the ones the hardware bring-up uses; nothing
/// establishes that they are minimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Link frequency
    pub frequency: LinkFrequency,
    /// Clock-configuration poll bounds
    pub poll: PollConfig,
    /// Wait before Explorer clock configuration
    pub init_settle: Duration,
    /// Wait between Explorer sync and FIRE sync
    pub fire_settle: Duration,
    /// Wait between FIRE sync and the training check
    pub check_settle: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            frequency: LinkFrequency::Mhz333,
            poll: PollConfig::default(),
            init_settle: Duration::from_secs(2),
            fire_settle: Duration::from_secs(1),
            check_settle: Duration::from_secs(4),
        }
    }
}

impl TrainingConfig {
    /// Default timings at `frequency`
    pub fn new(frequency: LinkFrequency) -> Self {
        Self {
            frequency,
            ..Self::default()
        }
    }

    /// No settle delays (simulation and tests)
    pub fn immediate(frequency: LinkFrequency) -> Self {
        Self {
            frequency,
            poll: PollConfig {
                timeout: Duration::from_millis(100),
                interval: Duration::ZERO,
            },
            init_settle: Duration::ZERO,
            fire_settle: Duration::ZERO,
            check_settle: Duration::ZERO,
        }
    }
}

/// Explorer link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Explorer answered its probe
    Probed,
    /// Reference clock selected and settled
    ClockConfigured,
    /// Training sequence written, training started
    TrainingArmed,
    /// Status reports training done
    TrainingComplete,
    /// Status read without the done bit, or a step failed
    TrainingFailed,
}

impl LinkState {
    /// State name as it appears in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::Probed => "Probed",
            Self::ClockConfigured => "ClockConfigured",
            Self::TrainingArmed => "TrainingArmed",
            Self::TrainingComplete => "TrainingComplete",
            Self::TrainingFailed => "TrainingFailed",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A sync write whose readback differed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMismatch {
    /// Explorer logical address or FIRE register address
    pub register: u64,
    /// Value written
    pub expected: u64,
    /// Value read back
    pub actual: u64,
}

/// Outcome of a sync sequence, Explorer or FIRE side
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Values of the read steps, in order
    pub reads: Vec<(u64, u64)>,
    /// Writes that did not read back
    pub mismatches: Vec<SyncMismatch>,
}

impl SyncReport {
    /// Every write read back as written
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Raw training status with its decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingReport {
    /// DL0 training status register
    pub status: u64,
}

impl TrainingReport {
    /// Training done bit set
    pub const fn done(&self) -> bool {
        self.status & reg::TRAINING_DONE != 0
    }

    /// Error bits set in the status, the done bit excluded
    pub fn errors(&self) -> impl Iterator<Item = &'static ErrorBit> {
        catalog::set_bits(self.status & !reg::TRAINING_DONE)
    }

    /// `TrainingFailed` unless the done bit is set
    ///
    /// # Errors
    ///
    /// Returns `TrainingFailed` carrying the raw status.
    pub fn into_result(self) -> Result<Self> {
        if self.done() {
            Ok(self)
        } else {
            Err(OcapiError::TrainingFailed {
                status: self.status,
            })
        }
    }
}

// ── Explorer side ────────────────────────────────────────────────────────────

/// Explorer with link-state tracking
#[derive(Debug)]
pub struct ExplorerLink<B: I2cBus> {
    bus: ExplorerBus<B>,
    frequency: LinkFrequency,
    state: LinkState,
}

impl<B: I2cBus> ExplorerLink<B> {
    /// Probe Explorer and start tracking
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotPresent` if Explorer does not acknowledge.
    pub fn open(bus: B, frequency: LinkFrequency) -> Result<Self> {
        Ok(Self::from_bus(ExplorerBus::open(bus)?, frequency))
    }

    /// Track an already probed Explorer
    pub const fn from_bus(bus: ExplorerBus<B>, frequency: LinkFrequency) -> Self {
        Self {
            bus,
            frequency,
            state: LinkState::Probed,
        }
    }

    /// Track an Explorer whose clock an earlier `init` already configured
    ///
    /// For a sync issued separately from the clock setup, e.g. a second
    /// command-line invocation.
    pub const fn clock_configured(bus: ExplorerBus<B>, frequency: LinkFrequency) -> Self {
        Self {
            bus,
            frequency,
            state: LinkState::ClockConfigured,
        }
    }

    /// Current state
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Configured frequency
    pub const fn frequency(&self) -> LinkFrequency {
        self.frequency
    }

    /// Underlying protocol handle
    pub fn bus(&mut self) -> &mut ExplorerBus<B> {
        &mut self.bus
    }

    /// Select the reference clock and wait for it to settle
    ///
    /// # Errors
    ///
    /// Returns `TrainingTimeout` if the clock block stays busy, or the bus error.
    pub fn init(&mut self, poll: &PollConfig) -> Result<()> {
        let result = self.bus.init(self.frequency, poll);
        self.state = match result {
            Ok(()) => LinkState::ClockConfigured,
            Err(_) => LinkState::TrainingFailed,
        };
        result
    }

    /// Run the training sequence, then start training
    ///
    /// Readback mismatches are collected, not fatal; the sequence runs to the
    /// end either way.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLinkState` before any bus traffic unless the link is
    /// `ClockConfigured`. Bus errors abort the sequence.
    pub fn sync(&mut self) -> Result<SyncReport> {
        if self.state != LinkState::ClockConfigured {
            return Err(OcapiError::InvalidLinkState {
                operation: "sync",
                expected: LinkState::ClockConfigured.name(),
                actual: self.state.name(),
            });
        }
        let result = self.run_sequence();
        self.state = match result {
            Ok(_) => LinkState::TrainingArmed,
            Err(_) => LinkState::TrainingFailed,
        };
        result
    }

    fn run_sequence(&mut self) -> Result<SyncReport> {
        info!("Explorer sync at {}", self.frequency);
        let mut report = SyncReport::default();
        for step in SYNC_SEQUENCE {
            match *step {
                SyncStep::Read(register) => {
                    let value = self.bus.double_read(register)?;
                    debug!("sync read {register:#010x} = {value:#x}");
                    report.reads.push((u64::from(register), value));
                }
                SyncStep::Write(register, expected) => {
                    let actual = self.write_step(register, expected)?;
                    if actual != expected {
                        warn!("sync write {register:#010x}: wrote {expected:#x}, read {actual:#x}");
                        report.mismatches.push(SyncMismatch {
                            register: u64::from(register),
                            expected,
                            actual,
                        });
                    }
                }
            }
        }
        self.bus.start_training(self.frequency)?;
        Ok(report)
    }

    fn write_step(&mut self, register: u32, expected: u64) -> Result<u64> {
        match self.bus.double_write_verified(register, expected) {
            Ok(()) => Ok(expected),
            Err(OcapiError::WriteVerificationFailed { actual, .. }) => Ok(actual),
            Err(e) => Err(e),
        }
    }

    /// Read the training status and classify it
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn check_sync(&mut self) -> Result<TrainingReport> {
        let report = TrainingReport {
            status: self.bus.double_read(reg::TRAINING_STATUS)?,
        };
        self.state = if report.done() {
            info!("Training successfully done ({:#x})", report.status);
            LinkState::TrainingComplete
        } else {
            warn!("Training failed ({:#x})", report.status);
            LinkState::TrainingFailed
        };
        Ok(report)
    }

    /// Stop tracking and hand back the protocol handle
    pub fn into_inner(self) -> ExplorerBus<B> {
        self.bus
    }
}

// ── Full bring-up ────────────────────────────────────────────────────────────

/// Result of a full link bring-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Explorer sync sequence
    pub sync: SyncReport,
    /// FIRE DL control sync, all targets
    pub host_sync: SyncReport,
    /// Training status after both sides synced
    pub training: TrainingReport,
}

/// Drives both chips through link training
#[derive(Debug)]
pub struct LinkTrainer<E: I2cBus, F: I2cBus> {
    explorer: ExplorerLink<E>,
    fire: FireBus<F>,
    config: TrainingConfig,
}

impl<E: I2cBus, F: I2cBus> LinkTrainer<E, F> {
    /// Pair an Explorer link with FIRE
    pub const fn new(explorer: ExplorerLink<E>, fire: FireBus<F>, config: TrainingConfig) -> Self {
        Self {
            explorer,
            fire,
            config,
        }
    }

    /// Explorer sync, settle, FIRE sync, settle, training check
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` before any bus traffic for targets without a
    /// host-configuration block, `InvalidLinkState` if Explorer's clock is not
    /// configured, or the bus error. Readback mismatches on either side are
    /// collected in the outcome.
    pub fn run(&mut self, targets: DdimmSet) -> Result<LinkOutcome> {
        if let Some(d) = targets.iter().find(|d| d.host_conf_base().is_none()) {
            return Err(OcapiError::invalid_target(d.letter(), "no host configuration block"));
        }

        let sync = self.explorer.sync()?;
        std::thread::sleep(self.config.fire_settle);
        let host_sync = self.fire.fire_sync(targets)?;
        std::thread::sleep(self.config.check_settle);
        let training = self.explorer.check_sync()?;
        Ok(LinkOutcome {
            sync,
            host_sync,
            training,
        })
    }

    /// Explorer link state
    pub const fn state(&self) -> LinkState {
        self.explorer.state()
    }

    /// Host-side link status per target
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` for targets without a host-configuration block.
    pub fn host_status(&mut self, targets: DdimmSet) -> Result<Vec<(Ddimm, Result<bool>)>> {
        self.fire.fire_check_sync(targets)
    }

    /// Split back into the two chips
    pub fn into_parts(self) -> (ExplorerLink<E>, FireBus<F>) {
        (self.explorer, self.fire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let c = TrainingConfig::default();
        assert_eq!(c.frequency, LinkFrequency::Mhz333);
        assert_eq!(c.init_settle, Duration::from_secs(2));
        assert_eq!(c.fire_settle, Duration::from_secs(1));
        assert_eq!(c.check_settle, Duration::from_secs(4));
        assert_eq!(c.poll.timeout, Duration::from_secs(5));
    }

    #[test]
    fn state_names() {
        assert_eq!(LinkState::ClockConfigured.to_string(), "ClockConfigured");
        assert_eq!(LinkState::TrainingFailed.name(), "TrainingFailed");
    }

    #[test]
    fn report_classification() {
        let done = TrainingReport {
            status: 0x0000_0080_0000_0000,
        };
        assert!(done.done());
        assert_eq!(done.errors().count(), 0);
        assert!(done.into_result().is_ok());

        let failed = TrainingReport {
            status: (1 << 33) | (1 << 16),
        };
        assert!(!failed.done());
        let labels: Vec<_> = failed.errors().map(|e| e.label).collect();
        assert_eq!(labels, vec!["CRC error detected", "Lost block lock"]);
        assert!(matches!(
            failed.into_result(),
            Err(OcapiError::TrainingFailed { status }) if status == (1 << 33) | (1 << 16)
        ));
    }
}
