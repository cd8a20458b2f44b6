//! Sensor Health
//!
//! Keeps status, last value and error statistics for every sensor on the cane and
//! renders them as the `HEALTH:<json>` report for the companion app.
//!
//! The ToF path reports into it on every sample; other sensor drivers report the
//! same way through [`HealthRegistry::update`]. Broadcasts are limited to one every
//! three seconds unless the app explicitly asks for one.

use crate::system::frame::{self, HEALTH_KEY};
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant};
use heapless::{String, Vec};
use serde::Serialize;
use thiserror::Error;

/// Capacity of the rendered JSON document
pub const HEALTH_JSON_LEN: usize = 1280;

/// Capacity of the full `HEALTH:<json>` payload
pub const HEALTH_PAYLOAD_LEN: usize = HEALTH_JSON_LEN + HEALTH_KEY.len() + 1;

/// Minimum spacing of unforced broadcasts
const BROADCAST_INTERVAL: Duration = Duration::from_secs(3);

/// A sensor counts as healthy only if it reported OK this recently
const FRESHNESS: Duration = Duration::from_secs(10);

const SENSOR_COUNT: usize = 6;

/// Health registry shared between tasks
pub type SharedHealth = Mutex<CriticalSectionRawMutex, RefCell<HealthRegistry>>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HealthError {
    #[error("health report does not fit the buffer")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorId {
    /// ToF distance sensor
    Vl53l1x,
    /// IMU
    Mpu6050,
    /// Temperature and humidity
    Dht22,
    /// Ambient light
    Bh1750,
    /// RFID reader
    Mfrc522,
    /// GPS module
    Neo6m,
}

impl SensorId {
    const fn index(self) -> usize {
        self as usize
    }

    const fn display_name(self) -> &'static str {
        match self {
            Self::Vl53l1x => "ToF Distance",
            Self::Mpu6050 => "IMU",
            Self::Dht22 => "Temp/Humidity",
            Self::Bh1750 => "Light Sensor",
            Self::Mfrc522 => "RFID Reader",
            Self::Neo6m => "GPS Module",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorStatus {
    Ok,
    Error,
    Timeout,
    Disconnected,
    InitFailed,
}

/// Health record of one sensor
#[derive(Debug, Clone)]
pub struct SensorHealth {
    status: SensorStatus,
    last_update: Option<Instant>,
    last_value: String<16>,
    error_count: u32,
    error: String<32>,
}

impl SensorHealth {
    const fn new() -> Self {
        Self {
            status: SensorStatus::InitFailed,
            last_update: None,
            last_value: String::new(),
            error_count: 0,
            error: String::new(),
        }
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_value(&self) -> &str {
        &self.last_value
    }
}

pub struct HealthRegistry {
    sensors: [SensorHealth; SENSOR_COUNT],
    last_broadcast: Option<Instant>,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        const UNKNOWN: SensorHealth = SensorHealth::new();
        Self {
            sensors: [UNKNOWN; SENSOR_COUNT],
            last_broadcast: None,
        }
    }

    /// Records a status report
    ///
    /// An OK report stores `value` and clears the error text, any other status
    /// counts as an error and stores `error`.
    pub fn update(&mut self, sensor: SensorId, status: SensorStatus, value: Option<&str>, error: Option<&str>, now: Instant) {
        let record = &mut self.sensors[sensor.index()];
        record.status = status;
        record.last_update = Some(now);
        if status == SensorStatus::Ok {
            record.error.clear();
            if let Some(value) = value {
                copy_truncated(&mut record.last_value, value);
            }
        } else {
            record.error_count = record.error_count.saturating_add(1);
            if let Some(error) = error {
                copy_truncated(&mut record.error, error);
            }
        }
    }

    pub fn sensor(&self, sensor: SensorId) -> &SensorHealth {
        &self.sensors[sensor.index()]
    }

    /// OK and updated within the last ten seconds
    pub fn is_healthy(&self, sensor: SensorId, now: Instant) -> bool {
        let record = self.sensor(sensor);
        record.status == SensorStatus::Ok
            && record
                .last_update
                .is_some_and(|at| now.saturating_duration_since(at) < FRESHNESS)
    }

    /// Claims a broadcast slot; unforced broadcasts are rate limited
    pub fn claim_broadcast(&mut self, now: Instant, force: bool) -> bool {
        let due = self
            .last_broadcast
            .map_or(true, |at| now.saturating_duration_since(at) >= BROADCAST_INTERVAL);
        if force || due {
            self.last_broadcast = Some(now);
            true
        } else {
            false
        }
    }

    /// Renders the JSON report into `out`, returns the number of bytes written
    pub fn render(&self, now: Instant, out: &mut [u8]) -> Result<usize, HealthError> {
        let entry = |id: SensorId| {
            let record = self.sensor(id);
            SensorEntry {
                name: id.display_name(),
                status: record.status,
                last_update: record.last_update.map_or(0, |at| at.as_millis()),
                last_value: if record.last_value.is_empty() {
                    "N/A"
                } else {
                    record.last_value.as_str()
                },
                error_count: record.error_count,
                error: (!record.error.is_empty()).then_some(record.error.as_str()),
            }
        };
        let report = Report {
            kind: "sensor_health",
            timestamp: now.as_millis(),
            sensors: Sensors {
                vl53l1x: entry(SensorId::Vl53l1x),
                mpu6050: entry(SensorId::Mpu6050),
                dht22: entry(SensorId::Dht22),
                bh1750: entry(SensorId::Bh1750),
                mfrc522: entry(SensorId::Mfrc522),
                neo6m: entry(SensorId::Neo6m),
            },
        };
        serde_json_core::to_slice(&report, out).map_err(|_| HealthError::Overflow)
    }

    /// Renders the complete `HEALTH:<json>` payload
    pub fn payload(&self, now: Instant) -> Result<Vec<u8, HEALTH_PAYLOAD_LEN>, HealthError> {
        let mut json = [0u8; HEALTH_JSON_LEN];
        let len = self.render(now, &mut json)?;
        frame::payload(HEALTH_KEY, &json[..len]).map_err(|_| HealthError::Overflow)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: u64,
    sensors: Sensors<'a>,
}

#[derive(Serialize)]
struct Sensors<'a> {
    vl53l1x: SensorEntry<'a>,
    mpu6050: SensorEntry<'a>,
    dht22: SensorEntry<'a>,
    bh1750: SensorEntry<'a>,
    mfrc522: SensorEntry<'a>,
    neo6m: SensorEntry<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorEntry<'a> {
    name: &'static str,
    status: SensorStatus,
    last_update: u64,
    last_value: &'a str,
    error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

fn copy_truncated<const N: usize>(dst: &mut String<N>, src: &str) {
    dst.clear();
    for ch in src.chars() {
        if dst.push(ch).is_err() {
            break;
        }
    }
}
