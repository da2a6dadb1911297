//! End-to-end link bring-up on the simulated board

use ocapi_chip::explorer::reg;
use ocapi_driver::chip::{Ddimm, LinkFrequency};
use ocapi_driver::{
    ExplorerBus, ExplorerLink, FireBus, LinkState, LinkTrainer, OcapiError, PollConfig, SimulatedBus,
    TrainingConfig,
};
use std::time::Duration;

fn trainer(sim: &SimulatedBus) -> LinkTrainer<SimulatedBus, SimulatedBus> {
    let config = TrainingConfig::immediate(LinkFrequency::Mhz400);
    let mut explorer = ExplorerLink::open(sim.clone(), config.frequency).unwrap();
    explorer.init(&config.poll).unwrap();
    assert_eq!(explorer.state(), LinkState::ClockConfigured);
    let fire = FireBus::open(sim.clone()).unwrap();
    LinkTrainer::new(explorer, fire, config)
}

#[test]
fn full_bring_up_completes() {
    let sim = SimulatedBus::new();
    let mut t = trainer(&sim);

    let outcome = t.run("a".parse().unwrap()).unwrap();
    assert!(outcome.sync.is_clean());
    assert!(outcome.host_sync.is_clean());
    assert_eq!(outcome.sync.reads.len(), 14);
    assert!(outcome.training.done());
    assert_eq!(outcome.training.errors().count(), 0);
    assert_eq!(t.state(), LinkState::TrainingComplete);

    let host = t.host_status("a".parse().unwrap()).unwrap();
    assert_eq!(host.len(), 1);
    assert_eq!(host[0].0, Ddimm::A);
    assert!(*host[0].1.as_ref().unwrap());
}

#[test]
fn w_rejected_before_any_traffic() {
    let sim = SimulatedBus::new();
    let mut t = trainer(&sim);
    sim.clear_log();

    let err = t.run("aw".parse().unwrap()).unwrap_err();
    assert!(matches!(err, OcapiError::InvalidTarget { target: 'W', .. }));
    assert!(sim.transactions().is_empty());
    assert_eq!(t.state(), LinkState::ClockConfigured);
}

#[test]
fn check_sync_classifies_status() {
    let sim = SimulatedBus::new();
    let mut link = ExplorerLink::open(sim.clone(), LinkFrequency::Mhz333).unwrap();

    sim.set_explorer_register(reg::TRAINING_STATUS, 0x0000_0080_0000_0000);
    let report = link.check_sync().unwrap();
    assert!(report.done());
    assert_eq!(link.state(), LinkState::TrainingComplete);

    sim.set_explorer_register(reg::TRAINING_STATUS, 0);
    let report = link.check_sync().unwrap();
    assert!(!report.done());
    assert_eq!(link.state(), LinkState::TrainingFailed);
    assert!(matches!(
        report.into_result(),
        Err(OcapiError::TrainingFailed { status: 0 })
    ));
}

#[test]
fn clock_poll_times_out() {
    let sim = SimulatedBus::new().with_clock_polls(u32::MAX);
    let mut link = ExplorerLink::open(sim, LinkFrequency::Mhz333).unwrap();
    let poll = PollConfig {
        timeout: Duration::from_millis(20),
        interval: Duration::from_millis(1),
    };

    let err = link.init(&poll).unwrap_err();
    assert!(matches!(err, OcapiError::TrainingTimeout { duration_ms: 20 }));
    assert_eq!(link.state(), LinkState::TrainingFailed);
}

#[test]
fn sync_refused_before_clock_configured() {
    let sim = SimulatedBus::new();
    let mut link = ExplorerLink::open(sim.clone(), LinkFrequency::Mhz333).unwrap();
    sim.clear_log();

    let err = link.sync().unwrap_err();
    assert!(matches!(
        err,
        OcapiError::InvalidLinkState {
            operation: "sync",
            actual: "Probed",
            ..
        }
    ));
    assert!(sim.transactions().is_empty());
    assert_eq!(link.state(), LinkState::Probed);
}

#[test]
fn sync_after_separate_init() {
    let sim = SimulatedBus::new();
    let bus = ExplorerBus::open(sim.clone()).unwrap();
    let mut link = ExplorerLink::clock_configured(bus, LinkFrequency::Mhz333);
    assert!(link.sync().unwrap().is_clean());
    assert_eq!(link.state(), LinkState::TrainingArmed);
}

#[test]
fn full_bring_up_reports_host_mismatch() {
    let sim =
        SimulatedBus::new().with_fire_clear_on_write(Ddimm::A.dl_control().unwrap(), 1 << 16);
    let mut t = trainer(&sim);

    let outcome = t.run("a".parse().unwrap()).unwrap();
    assert_eq!(outcome.host_sync.mismatches.len(), 1);
    assert!(outcome.sync.is_clean());
    assert_eq!(t.state(), LinkState::TrainingComplete);
}

#[test]
fn sync_aborts_on_bus_error() {
    let sim = SimulatedBus::new();
    let mut link = ExplorerLink::open(sim.clone(), LinkFrequency::Mhz333).unwrap();
    link.init(&TrainingConfig::immediate(LinkFrequency::Mhz333).poll)
        .unwrap();
    sim.fail_after(40);

    let err = link.sync().unwrap_err();
    assert!(matches!(err, OcapiError::BusIo { .. }));
    assert_eq!(link.state(), LinkState::TrainingFailed);
}
