//! App Commands
//!
//! Commands arrive as short text lines on the inbound characteristic. Every
//! non-empty line is acknowledged with `CMD_ACK:<line>`, known or not, so the app
//! can tell the device is listening.

use crate::system::alert::FeedbackMode;
use crate::system::frame::{Line, Telemetry};

/// Longest command that is acknowledged verbatim
pub const MAX_COMMAND_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Switch to RADAR mode
    Radar,
    /// Switch to SIMPLE mode
    Simple,
    /// Toggle between SIMPLE and RADAR
    ToggleScanMode,
    /// Select the feedback outputs
    Feedback(FeedbackMode),
    /// Reinitialize the ToF sensor and its filter
    SensorReset,
    /// Send the health report now
    Health,
    /// Log queue and link statistics
    Stats,
    Unknown,
}

impl Command {
    /// Parses a received line; None for blank lines
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (verb, argument) = match line.split_once(':') {
            Some((verb, argument)) => (verb.trim(), Some(argument.trim())),
            None => (line, None),
        };

        let command = match (verb, argument) {
            (v, None) if v.eq_ignore_ascii_case("radar") => Self::Radar,
            (v, None) if v.eq_ignore_ascii_case("simple") => Self::Simple,
            (v, None) if v.eq_ignore_ascii_case("tofmode") => Self::ToggleScanMode,
            (v, None) if v.eq_ignore_ascii_case("tofreset") => Self::SensorReset,
            (v, None) if v.eq_ignore_ascii_case("health") => Self::Health,
            (v, None) if v.eq_ignore_ascii_case("stats") => Self::Stats,
            (v, Some(mode)) if v.eq_ignore_ascii_case("feedback") => parse_feedback(mode),
            _ => Self::Unknown,
        };
        Some(command)
    }
}

fn parse_feedback(mode: &str) -> Command {
    if mode.eq_ignore_ascii_case("both") {
        Command::Feedback(FeedbackMode::Both)
    } else if mode.eq_ignore_ascii_case("buzzer") {
        Command::Feedback(FeedbackMode::BuzzerOnly)
    } else if mode.eq_ignore_ascii_case("vibration") {
        Command::Feedback(FeedbackMode::VibrationOnly)
    } else if let Ok(code) = mode.parse::<u8>() {
        Command::Feedback(FeedbackMode::from_code(code))
    } else {
        Command::Unknown
    }
}

/// Frames the acknowledgement for a received line, None for blank lines
pub fn acknowledge(line: &str) -> Option<Line> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut end = line.len().min(MAX_COMMAND_LEN);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    Telemetry::CommandAck(&line[..end]).encode().ok()
}
