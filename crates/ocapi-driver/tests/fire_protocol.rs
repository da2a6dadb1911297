//! FIRE register protocol against the simulated board

use ocapi_chip::fire::{self, host_conf};
use ocapi_driver::chip::{Ddimm, ResetState};
use ocapi_driver::{FireBus, OcapiError, SimulatedBus};

fn open() -> (SimulatedBus, FireBus<SimulatedBus>) {
    let sim = SimulatedBus::new();
    let chip = FireBus::open(sim.clone()).expect("FIRE present");
    (sim, chip)
}

#[test]
fn single_read_returns_previous_address() {
    let (sim, mut chip) = open();
    sim.set_fire_register(fire::LED_CONTROL, 0x5A);

    chip.read_register(fire::LED_CONTROL).unwrap();
    let lagged = chip.read_register(fire::VERSION).unwrap();
    assert_eq!(lagged, 0x5A, "FIFO holds the value of the previous address frame");

    assert_eq!(chip.read_register_stable(fire::VERSION).unwrap(), 0x090A_D53D);
}

#[test]
fn write_then_read_back() {
    let (sim, mut chip) = open();
    assert!(chip.write_register(fire::LED_OVERRIDE, 0xDEAD_BEEF).unwrap());
    assert_eq!(sim.fire_register(fire::LED_OVERRIDE), 0xDEAD_BEEF);
    assert_eq!(chip.read_register_stable(fire::LED_OVERRIDE).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn unknown_register_reads_sentinel() {
    let (_sim, mut chip) = open();
    assert_eq!(
        chip.read_register_stable(0x0300_0000_0000_0000).unwrap(),
        fire::REG_NOT_FOUND
    );
}

#[test]
fn chip_id_reports_frequency() {
    let sim = SimulatedBus::new().with_fire_id(0x1000_0000 | 0x05CD_07BE);
    let mut chip = FireBus::open(sim).unwrap();
    let fid = chip.chip_id().unwrap();
    assert!(fid.is_dirty());
    assert_eq!(fid.frequency().mhz(), 333);
}

#[test]
fn reset_a_clears_its_bit_only() {
    let (sim, mut chip) = open();
    let written = chip.set_ddimm_reset(ResetState::On, "a".parse().unwrap()).unwrap();
    assert_eq!(written, 0x17);
    assert_eq!(sim.fire_register(fire::RESET_CONTROL), 0x17);

    chip.set_ddimm_reset(ResetState::Off, "a".parse().unwrap()).unwrap();
    assert_eq!(sim.fire_register(fire::RESET_CONTROL), 0x1F);
}

#[test]
fn reset_all_including_w() {
    let (sim, mut chip) = open();
    chip.set_ddimm_reset(ResetState::On, "abcdw".parse().unwrap()).unwrap();
    assert_eq!(sim.fire_register(fire::RESET_CONTROL), 0);
}

#[test]
fn fire_sync_writes_each_target_dl_control() {
    let (sim, mut chip) = open();
    chip.fire_sync("bd".parse().unwrap()).unwrap();
    for d in [Ddimm::B, Ddimm::D] {
        let ctl = d.dl_control().unwrap();
        assert_eq!(sim.fire_register(ctl), host_conf::SYNC_SEQUENCE[1]);
    }
    assert_eq!(sim.fire_register(Ddimm::A.dl_control().unwrap()), 0);
}

#[test]
fn fire_sync_reports_state_before_sync() {
    let (sim, mut chip) = open();
    let ctl = Ddimm::A.dl_control().unwrap();
    sim.set_fire_register(ctl, 0x1234);
    chip.read_register(fire::VERSION).unwrap();

    let report = chip.fire_sync("a".parse().unwrap()).unwrap();
    assert_eq!(report.reads, vec![(ctl, 0x1234)]);
    assert!(report.is_clean());
}

#[test]
fn fire_sync_keeps_going_after_mismatch() {
    // bit 16 never sticks on A: only the first sync value reads back wrong
    let a = Ddimm::A.dl_control().unwrap();
    let sim = SimulatedBus::new().with_fire_clear_on_write(a, 1 << 16);
    let mut chip = FireBus::open(sim.clone()).unwrap();

    let report = chip.fire_sync("ab".parse().unwrap()).unwrap();
    assert_eq!(report.mismatches.len(), 1);
    let m = report.mismatches[0];
    assert_eq!(m.register, a);
    assert_eq!(m.expected, host_conf::SYNC_SEQUENCE[0]);
    assert_eq!(m.actual, host_conf::SYNC_SEQUENCE[0] & !(1 << 16));

    assert_eq!(sim.fire_register(a), host_conf::SYNC_SEQUENCE[1]);
    assert_eq!(
        sim.fire_register(Ddimm::B.dl_control().unwrap()),
        host_conf::SYNC_SEQUENCE[1]
    );
}

#[test]
fn check_sync_per_target() {
    let (sim, mut chip) = open();
    sim.set_fire_register(Ddimm::B.status().unwrap(), host_conf::LINK_UP);

    let status = chip.fire_check_sync("ab".parse().unwrap()).unwrap();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].0, Ddimm::A);
    assert!(!*status[0].1.as_ref().unwrap());
    assert_eq!(status[1].0, Ddimm::B);
    assert!(*status[1].1.as_ref().unwrap());
}

#[test]
fn check_sync_rejects_w() {
    let (_sim, mut chip) = open();
    let err = chip.fire_check_sync("w".parse().unwrap()).unwrap_err();
    assert!(matches!(err, OcapiError::InvalidTarget { target: 'W', .. }));
}

#[test]
fn retrain_sets_retrain_bit() {
    let (sim, mut chip) = open();
    let ctl = Ddimm::C.dl_control().unwrap();
    sim.set_fire_register(ctl, host_conf::SYNC_SEQUENCE[1]);

    let status = chip.retrain("c".parse().unwrap()).unwrap();
    assert_eq!(
        sim.fire_register(ctl),
        host_conf::SYNC_SEQUENCE[1] | host_conf::RETRAIN
    );
    assert_eq!(status.len(), 1);
}

#[test]
fn bus_fault_surfaces_as_bus_io() {
    let (sim, mut chip) = open();
    sim.fail_after(3);
    let err = chip.read_register(fire::VERSION).unwrap_err();
    assert!(matches!(err, OcapiError::BusIo { address: 0x38, .. }));
    assert!(!err.is_fatal());
}
