//! Register model for an OpenCAPI link: FIRE host bridge + Explorer/ICE buffer.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the two chips as seen from the I2C control bus: device
//! addresses, register maps, the Explorer wide-register address transform,
//! the link training step table, and the diagnostic catalogs.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`i2c`] | 7-bit bus addresses of every device on the carrier, card detection |
//! | [`fire`] | FIRE register map (FML block, host configuration blocks, ID bits) |
//! | [`explorer`] | Explorer command tags, [`explorer::Address`], link frequency, sync table |
//! | [`catalog`] | Firmware-info register catalog and DL0 error-bit descriptors |
//! | [`ddimm`] | DDIMM targets (A–D, W) and reset-control bit manipulation |
//! | [`eeprom`] | DDIMM EEPROM offsets, density and vendor decoding |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unreadable_literal)]

pub mod catalog;
pub mod ddimm;
pub mod eeprom;
pub mod explorer;
pub mod fire;
pub mod i2c;
