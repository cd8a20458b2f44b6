//! Telemetry line framing
//!
//! Every outbound message is a single UTF-8 line `KEY:value[,value...]\n` that fits a
//! 64 byte notification including the newline. Only the health report is larger; it
//! is built into its own buffer and sent in chunks.

use core::fmt::Write;
use heapless::{String, Vec};
use thiserror::Error;

/// Maximum size of a framed line including the trailing newline
pub const MAX_LINE_LEN: usize = 64;

/// Key of the chunked health report
pub const HEALTH_KEY: &str = "HEALTH";

/// One framed line, ready for the radio
pub type Line = Vec<u8, MAX_LINE_LEN>;

/// Number of distances carried by one radar chunk line
pub const RADAR_CHUNK_LEN: usize = 10;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    #[error("line does not fit the frame")]
    TooLong,
}

/// Safest direction bucket of a radar sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Left,
    Center,
    Right,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Center => "CENTER",
            Self::Right => "RIGHT",
        }
    }
}

/// Outbound telemetry messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Telemetry<'a> {
    /// Celsius, one decimal
    Temperature(f32),
    /// Relative humidity, one decimal
    Humidity(f32),
    /// Forward obstacle distance in millimeters (SIMPLE mode)
    Obstacle(u16),
    BatteryMillivolts(u16),
    /// Current RFID zone
    Rfid(u8),
    Steps(u32),
    Lux(u32),
    Fall(bool),
    Gps { latitude: f64, longitude: f64 },
    /// Batched environmental line
    Sensors { temperature: f32, humidity: f32, obstacle_mm: u16, lux: u32 },
    Motion { pitch: f32, roll: f32, yaw: f32 },
    /// 1 while in RADAR mode
    TofMode(bool),
    RadarLive { angle: u8, millimeters: u16 },
    /// Ten consecutive angles of the radar table, starting at `index * 10`
    RadarChunk { index: u8, distances: &'a [u16] },
    Safest { direction: Direction, angle: u8 },
    CommandAck(&'a str),
}

impl Telemetry<'_> {
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Temperature(_) => "TEMP",
            Self::Humidity(_) => "HUM",
            Self::Obstacle(_) => "OBST",
            Self::BatteryMillivolts(_) => "BATTmV",
            Self::Rfid(_) => "RFID",
            Self::Steps(_) => "STEP",
            Self::Lux(_) => "LUX",
            Self::Fall(_) => "FALL",
            Self::Gps { .. } => "GPS",
            Self::Sensors { .. } => "SENSORS",
            Self::Motion { .. } => "MOTION",
            Self::TofMode(_) => "TOFMODE",
            Self::RadarLive { .. } => "RADAR_LIVE",
            Self::RadarChunk { .. } => "RADAR",
            Self::Safest { .. } => "SAFEST",
            Self::CommandAck(_) => "CMD_ACK",
        }
    }

    /// Frames the message into a newline terminated line
    pub fn encode(&self) -> Result<Line, FrameError> {
        let mut line: String<MAX_LINE_LEN> = String::new();
        self.write_into(&mut line).map_err(|_| FrameError::TooLong)?;
        line.push('\n').map_err(|_| FrameError::TooLong)?;
        Ok(line.into_bytes())
    }

    fn write_into(&self, out: &mut impl Write) -> core::fmt::Result {
        out.write_str(self.key())?;
        match *self {
            Self::RadarChunk { index, .. } => write!(out, "{}:", index)?,
            _ => out.write_char(':')?,
        }
        match *self {
            Self::Temperature(celsius) => write!(out, "{:.1}", celsius),
            Self::Humidity(percent) => write!(out, "{:.1}", percent),
            Self::Obstacle(millimeters) => write!(out, "{}", millimeters),
            Self::BatteryMillivolts(millivolts) => write!(out, "{}", millivolts),
            Self::Rfid(zone) => write!(out, "{}", zone),
            Self::Steps(steps) => write!(out, "{}", steps),
            Self::Lux(lux) => write!(out, "{}", lux),
            Self::Fall(fallen) => write!(out, "{}", u8::from(fallen)),
            Self::Gps { latitude, longitude } => write!(out, "{:.6},{:.6}", latitude, longitude),
            Self::Sensors {
                temperature,
                humidity,
                obstacle_mm,
                lux,
            } => write!(out, "{:.1},{:.1},{},{}", temperature, humidity, obstacle_mm, lux),
            Self::Motion { pitch, roll, yaw } => write!(out, "{:.1},{:.1},{:.1}", pitch, roll, yaw),
            Self::TofMode(radar) => write!(out, "{}", u8::from(radar)),
            Self::RadarLive { angle, millimeters } => write!(out, "{},{}", angle, millimeters),
            Self::RadarChunk { distances, .. } => {
                for (i, distance) in distances.iter().enumerate() {
                    if i > 0 {
                        out.write_char(',')?;
                    }
                    write!(out, "{}", distance)?;
                }
                Ok(())
            }
            Self::Safest { direction, angle } => write!(out, "{},{}", direction.as_str(), angle),
            Self::CommandAck(command) => out.write_str(command),
        }
    }
}

/// Builds an unterminated `KEY:body` payload of any size
///
/// Used for the health report, which is split into newline terminated chunks on
/// transmission.
pub fn payload<const N: usize>(key: &str, body: &[u8]) -> Result<Vec<u8, N>, FrameError> {
    let mut payload = Vec::new();
    payload.extend_from_slice(key.as_bytes()).map_err(|_| FrameError::TooLong)?;
    payload.push(b':').map_err(|_| FrameError::TooLong)?;
    payload.extend_from_slice(body).map_err(|_| FrameError::TooLong)?;
    Ok(payload)
}
