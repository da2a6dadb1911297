//! Explorer register protocol against the simulated board

use ocapi_chip::catalog;
use ocapi_chip::explorer::{reg, Address};
use ocapi_driver::{ExplorerBus, OcapiError, SimulatedBus, Transaction};

fn open() -> (SimulatedBus, ExplorerBus<SimulatedBus>) {
    let sim = SimulatedBus::new();
    let chip = ExplorerBus::open(sim.clone()).expect("Explorer present");
    (sim, chip)
}

#[test]
fn wide_register_round_trip() {
    let (sim, mut chip) = open();
    assert!(chip.double_write(0x0804_0017, 0x1122_3344_5566_7788).unwrap());
    assert_eq!(sim.explorer_register(0x0804_0017), 0x1122_3344_5566_7788);
    assert_eq!(chip.double_read(0x0804_0017).unwrap(), 0x1122_3344_5566_7788);
}

#[test]
fn wide_register_lands_in_two_slots() {
    let (sim, mut chip) = open();
    chip.double_write(0x0801_2811, 0x0000_0500_0000_006F).unwrap();

    let base = Address::new(0x0801_2811).base();
    assert_eq!(base, 0x0809_4088);
    assert_eq!(sim.explorer_register(0x0801_2811) >> 32, 0x0000_0500);
}

#[test]
fn narrow_register_keeps_low_half() {
    let (_sim, mut chip) = open();
    assert!(!chip.double_write(0x0000_2058, 0xAAAA_BBBB_CCCC_DDDD).unwrap());
    assert_eq!(chip.double_read(0x0000_2058).unwrap(), 0xCCCC_DDDD);
    assert!(chip.double_write(0x0000_2058, 0x1234).unwrap());
}

#[test]
fn verified_write_reports_mismatch() {
    let (_sim, mut chip) = open();
    let err = chip
        .double_write_verified(0x0000_2058, 0x1_0000_0001)
        .unwrap_err();
    assert!(matches!(
        err,
        OcapiError::WriteVerificationFailed {
            register: 0x2058,
            expected: 0x1_0000_0001,
            actual: 1,
        }
    ));
}

#[test]
fn firmware_info_follows_catalog() {
    let (_sim, mut chip) = open();
    let info = chip.firmware_info().unwrap();
    assert_eq!(info.len(), catalog::FIRMWARE_REGISTERS.len());
    assert_eq!(info[0], ("FW number of images", 2));
    assert_eq!(info.last().map(|(label, _)| *label), Some("Image index"));
}

fn sent(sim: &SimulatedBus, frame: &[u8]) -> bool {
    sim.transactions()
        .iter()
        .any(|t| matches!(t, Transaction::Write { bytes, .. } if bytes == frame))
}

fn fetch_frame(address: u64) -> Vec<u8> {
    let mut frame = vec![4, 4];
    frame.extend_from_slice(&address.to_be_bytes()[4..]);
    frame
}

#[test]
fn firmware_info_aborts_on_bus_error() {
    let (sim, mut chip) = open();
    sim.clear_log();
    // priming: 21 writes + 21 responses; mailbox: 4; first catalog entry: 4
    sim.fail_after(50);
    let err = chip.firmware_info().unwrap_err();
    assert!(matches!(err, OcapiError::BusIo { address: 0x20, .. }));

    let first = catalog::FIRMWARE_REGISTERS[0].address;
    let second = catalog::FIRMWARE_REGISTERS[1].address;
    assert!(sent(&sim, &fetch_frame(first)));
    assert!(!sent(&sim, &fetch_frame(second)));
    assert_eq!(sim.transactions().len(), 50);
}

#[test]
fn identity_words() {
    let (sim, mut chip) = open();
    let id = chip.identity().unwrap();
    assert_eq!(id.enterprise_mode, 1);
    assert_eq!(id.card_id, 0x0001_0002);
    assert_eq!(id.ecid.len(), 14);
    assert_eq!(id.ecid[0], sim.explorer_register(reg::ECID_FIRST));
    assert_eq!(id.ecid[13], sim.explorer_register(reg::ECID_LAST));
}

#[test]
fn missing_explorer_not_present() {
    let sim = SimulatedBus::new().without(0x20);
    let err = ExplorerBus::open(sim).unwrap_err();
    assert!(matches!(err, OcapiError::DeviceNotPresent { address: 0x20 }));
}
