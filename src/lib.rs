//! Smart cane core
//!
//! Hardware independent part of the smart cane firmware: obstacle range filtering,
//! proximity alerting, SIMPLE/RADAR scan control and the BLE telemetry transport.
//! The RP2350 binary (`src/main.rs`, `firmware` feature) binds these components to
//! the actual peripherals; everything in here also builds and tests on the host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod system;
