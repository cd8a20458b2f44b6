//! Telemetry Reporter
//!
//! Publishes the periodic status lines and the sensor health report.
//!
//! # Every report interval
//! - `TOFMODE`
//! - `OBST` in SIMPLE mode, the whole radar table as `RADARn` lines in RADAR mode
//! - `HEALTH`, at most every three seconds
//!
//! A health report asked for by the app is sent right away.

use crate::task::ble_link::SharedRadio;
use crate::task::{uplink, HEALTH, LINK, RADAR_TABLE, TELEMETRY_QUEUE};
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};
use smart_cane::system::frame::Telemetry;
use smart_cane::system::scan::{self, ScanMode};
use smart_cane::system::state::SENSOR_STATE;
use smart_cane::system::telemetry::{Uplink, TELEMETRY_QUEUE_SIZE};
use smart_cane::system::transmit::{self, TransmitConfig};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

static HEALTH_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Asks for an immediate health report, bypassing the rate limit
pub fn request_health() {
    HEALTH_REQUEST.signal(());
}

#[embassy_executor::task]
pub async fn telemetry_report(radio: &'static SharedRadio) {
    info!("telemetry reporter started");
    let uplink = uplink();
    let mut ticker = Ticker::every(REPORT_INTERVAL);
    loop {
        let forced = match select(ticker.next(), HEALTH_REQUEST.wait()).await {
            Either::First(_) => false,
            Either::Second(_) => true,
        };
        if !forced {
            publish_status(&uplink);
        }
        broadcast_health(radio, forced).await;
    }
}

fn publish_status(uplink: &Uplink<'_, TELEMETRY_QUEUE_SIZE>) {
    let radar = SENSOR_STATE.scan_mode() == ScanMode::Radar;
    uplink.publish(&Telemetry::TofMode(radar));
    if radar {
        scan::publish_table(&RADAR_TABLE, uplink);
    } else {
        uplink.publish(&Telemetry::Obstacle(SENSOR_STATE.forward_mm()));
    }
    debug!(
        "queue {}/{}, dropped {}",
        TELEMETRY_QUEUE.len(),
        TELEMETRY_QUEUE.capacity(),
        TELEMETRY_QUEUE.dropped()
    );
}

async fn broadcast_health(radio: &SharedRadio, force: bool) {
    // the rate limit slot is only claimed for a report that can go out
    let now = Instant::now();
    if !LINK.ready_to_send(now).await {
        return;
    }
    let payload = HEALTH.lock(|health| {
        let mut health = health.borrow_mut();
        if !health.claim_broadcast(now, force) {
            return None;
        }
        match health.payload(now) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("health report not rendered: {}", e);
                None
            }
        }
    });
    let Some(payload) = payload else {
        return;
    };
    match transmit::send_chunked(radio, &LINK, &payload, &TransmitConfig::new()).await {
        Ok(chunks) => debug!("health report sent in {} chunks", chunks),
        Err(e) => warn!("health report not sent: {}", e),
    }
}
