//! Smart cane firmware entry point
//!
//! Initializes the peripherals and spawns the sensing, sweep and BLE tasks.

#![no_std]
#![no_main]

use crate::task::{
    ble_link::{self, command_reader, link_monitor, SharedRadio},
    orchestrate::orchestrate,
    radar_sweep::radar_sweep,
    telemetry_report::telemetry_report,
    tof_sense::{tof_sense, SharedSensor, Vl53l1xSensor},
    transmit::transmit,
};
use embassy_executor::Spawner;
use embassy_rp::block::ImageDef;
use embassy_rp::config::Config;
use embassy_sync::mutex::Mutex;
use static_cell::StaticCell;
use task::resources::{
    AssignedResources, BleBridgeResources, FeedbackResources, SweepServoResources, TofSensorResources,
};
use {defmt_rtt as _, panic_probe as _};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// Task implementations
mod task;

static SENSOR: StaticCell<SharedSensor> = StaticCell::new();
static RADIO: StaticCell<SharedRadio> = StaticCell::new();

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Config::default());

    // Split the resources into separate groups for each task
    let r = split_resources!(p);

    // The sensor is shared by the sensing loop and the sweep, the bridge by the
    // transmit task, the reporter and the link monitor
    let sensor: &'static SharedSensor = SENSOR.init(Mutex::new(Vl53l1xSensor::new(r.tof_sensor)));
    let (bridge, inbound, state_pin) = ble_link::split(r.ble_bridge);
    let radio: &'static SharedRadio = RADIO.init(Mutex::new(bridge));

    spawner.spawn(orchestrate()).unwrap();
    spawner.spawn(tof_sense(sensor, r.feedback)).unwrap();
    spawner.spawn(radar_sweep(r.sweep_servo, sensor)).unwrap();
    spawner.spawn(transmit(radio)).unwrap();
    spawner.spawn(link_monitor(state_pin, radio)).unwrap();
    spawner.spawn(command_reader(inbound)).unwrap();
    spawner.spawn(telemetry_report(radio)).unwrap();
}
