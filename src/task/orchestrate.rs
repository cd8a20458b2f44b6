//! Orchestrator Module
//!
//! Listens for system events and turns app commands into requests for the tasks
//! that own the affected state.

use crate::task::telemetry_report;
use crate::task::{HEALTH, LINK, SWEEP_CONTROL, TELEMETRY_QUEUE, TRANSMIT_STATS};
use defmt::{debug, info, warn};
use embassy_time::Instant;
use smart_cane::system::command::Command;
use smart_cane::system::event::{self, Events, ScanRequest};
use smart_cane::system::health::SensorId;
use smart_cane::system::scan::ScanMode;
use smart_cane::system::state::SENSOR_STATE;

/// Main orchestrator task
#[embassy_executor::task]
pub async fn orchestrate() {
    info!("Orchestrator started");
    loop {
        let event = event::wait().await;
        handle_event(event);
    }
}

fn handle_event(event: Events) {
    match event {
        Events::CommandReceived(command) => handle_command(command),
        Events::LinkChanged(link_event) => info!("link {}", link_event),
        Events::ScanModeChanged(mode) => info!("scan mode now {}", mode),
        Events::ProximityChanged(level) => debug!("proximity level {}", level.get()),
        Events::SensorReset => warn!("ToF sensor was stuck and has been reinitialized"),
    }
}

fn handle_command(command: Command) {
    match command {
        Command::Radar => event::request_scan_mode(ScanRequest::Set(ScanMode::Radar)),
        Command::Simple => event::request_scan_mode(ScanRequest::Set(ScanMode::Simple)),
        Command::ToggleScanMode => event::request_scan_mode(ScanRequest::Toggle),
        Command::Feedback(mode) => SENSOR_STATE.set_feedback_mode(mode),
        Command::SensorReset => event::request_sensor_reset(),
        Command::Health => telemetry_report::request_health(),
        Command::Stats => log_stats(),
        Command::Unknown => debug!("unknown command ignored"),
    }
}

fn log_stats() {
    info!(
        "queue {}/{} enqueued {} dropped {}, sent {} discarded {}",
        TELEMETRY_QUEUE.len(),
        TELEMETRY_QUEUE.capacity(),
        TELEMETRY_QUEUE.enqueued(),
        TELEMETRY_QUEUE.dropped(),
        TRANSMIT_STATS.sent(),
        TRANSMIT_STATS.discarded()
    );
    info!(
        "link up {}, scan {}, sweeps {}, level {}, forward {} mm",
        LINK.try_is_connected(),
        SENSOR_STATE.scan_mode(),
        SWEEP_CONTROL.starts(),
        SENSOR_STATE.level().get(),
        SENSOR_STATE.forward_mm()
    );
    let tof_healthy = HEALTH.lock(|health| health.borrow().is_healthy(SensorId::Vl53l1x, Instant::now()));
    info!("ToF healthy {}", tof_healthy);
}
