//! Embassy tasks and the state they share
//!
//! Everything shared between tasks lives here as a static. The ToF sensor and the
//! BLE bridge need their peripherals first, main puts them into static cells and
//! hands the references to the tasks.

pub mod ble_link;
pub mod orchestrate;
pub mod radar_sweep;
pub mod resources;
pub mod telemetry_report;
pub mod tof_sense;
pub mod transmit;

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use smart_cane::system::health::{HealthRegistry, SharedHealth};
use smart_cane::system::link::{LinkConfig, LinkSession};
use smart_cane::system::scan::{RadarTable, SweepControl};
use smart_cane::system::telemetry::{TelemetryQueue, Uplink, TELEMETRY_QUEUE_SIZE};
use smart_cane::system::transmit::TransmitStats;

/// Outbound lines waiting for the transmit task
pub static TELEMETRY_QUEUE: TelemetryQueue<TELEMETRY_QUEUE_SIZE> = TelemetryQueue::new();

/// Connection state of the BLE peer
pub static LINK: LinkSession = LinkSession::new(LinkConfig::new());

pub static TRANSMIT_STATS: TransmitStats = TransmitStats::new();

/// Per-angle distances, written by the sweep only
pub static RADAR_TABLE: RadarTable = RadarTable::new();

pub static SWEEP_CONTROL: SweepControl = SweepControl::new();

pub static HEALTH: SharedHealth = Mutex::new(RefCell::new(HealthRegistry::new()));

/// Producer handle used by every task that publishes telemetry
pub fn uplink() -> Uplink<'static, TELEMETRY_QUEUE_SIZE> {
    Uplink::new(&TELEMETRY_QUEUE, &LINK)
}
