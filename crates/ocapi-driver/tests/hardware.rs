//! Hardware smoke tests
//!
//! Run with `cargo test -- --ignored` on a host with the card on /dev/i2c-3
//! and the bus path already set up.

use ocapi_driver::{scan, Eeprom, ExplorerBus, FireBus, LinuxI2c};

const BUS: u32 = 3;

#[test]
#[ignore] // Requires hardware
fn test_scan_finds_fire() {
    let mut bus = LinuxI2c::open(BUS).expect("i2c adapter");
    println!("Scanning {}", bus.path().display());
    let result = scan(&mut bus).expect("scan");
    for (address, name) in result.devices() {
        println!("{address:#04x}: {}", name.unwrap_or("?"));
    }
    println!("Card: {}", result.card);
    assert!(result.contains(0x38), "FIRE did not answer");
}

#[test]
#[ignore] // Requires hardware
fn test_fire_chip_id() {
    let mut fire = FireBus::open(LinuxI2c::open(BUS).expect("i2c adapter")).expect("FIRE");
    let fid = fire.chip_id().expect("version read");
    println!("{fid}");
    println!("Link frequency: {}", fid.frequency());
}

#[test]
#[ignore] // Requires hardware and a powered DDIMM
fn test_explorer_firmware_info() {
    let mut exp = ExplorerBus::open(LinuxI2c::open(BUS).expect("i2c adapter")).expect("Explorer");
    for (label, value) in exp.firmware_info().expect("firmware info") {
        println!("{label} : {value:#x}");
    }
}

#[test]
#[ignore] // Requires hardware and the path set up to a DDIMM
fn test_ddimm_eeprom_info() {
    let mut rom = Eeprom::open(LinuxI2c::open(BUS).expect("i2c adapter")).expect("EEPROM");
    println!("First bytes: {:02x?}", rom.header().expect("header"));
    println!("{}", rom.info().expect("info"));
}
