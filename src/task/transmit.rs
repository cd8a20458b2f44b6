//! Transmit Task
//!
//! Drains the telemetry queue into the BLE bridge.

use crate::task::ble_link::SharedRadio;
use crate::task::{LINK, TELEMETRY_QUEUE, TRANSMIT_STATS};
use smart_cane::system::transmit::{TransmitConfig, Transmitter};

#[embassy_executor::task]
pub async fn transmit(radio: &'static SharedRadio) {
    let mut transmitter = Transmitter::new(&TELEMETRY_QUEUE, &LINK, radio, &TRANSMIT_STATS, TransmitConfig::new());
    transmitter.run().await;
}
