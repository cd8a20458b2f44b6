//! System State
//!
//! Latest sensed values and user settings shared between tasks.
//!
//! The sensing task is the only writer of the distance fields; the command handling
//! writes the feedback mode. Everything is a plain atomic so the sensing loop never
//! waits on a lock and readers always see the latest complete value of each field.
//!
//! # State Components
//! - Feedback mode: which outputs the alerting may drive
//! - Scan mode: SIMPLE or RADAR
//! - Forward distance: filtered distance in millimeters (center reading in RADAR)
//! - Proximity level and warning flag of the last evaluation

use crate::system::alert::{FeedbackMode, ProximityLevel};
use crate::system::range_filter::MAX_DISTANCE_MM;
use crate::system::scan::ScanMode;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

/// Global sensor state
pub static SENSOR_STATE: SensorAggregate = SensorAggregate::new();

pub struct SensorAggregate {
    feedback_mode: AtomicU8,
    radar: AtomicBool,
    forward_mm: AtomicU16,
    level: AtomicU8,
    warning: AtomicBool,
}

impl SensorAggregate {
    /// Feedback on both outputs, SIMPLE mode, nothing in range
    pub const fn new() -> Self {
        Self {
            feedback_mode: AtomicU8::new(0),
            radar: AtomicBool::new(false),
            forward_mm: AtomicU16::new(MAX_DISTANCE_MM),
            level: AtomicU8::new(0),
            warning: AtomicBool::new(false),
        }
    }

    pub fn feedback_mode(&self) -> FeedbackMode {
        FeedbackMode::from_code(self.feedback_mode.load(Ordering::Relaxed))
    }

    pub fn set_feedback_mode(&self, mode: FeedbackMode) {
        self.feedback_mode.store(mode.code(), Ordering::Relaxed);
    }

    pub fn scan_mode(&self) -> ScanMode {
        if self.radar.load(Ordering::Relaxed) {
            ScanMode::Radar
        } else {
            ScanMode::Simple
        }
    }

    pub fn set_scan_mode(&self, mode: ScanMode) {
        self.radar.store(mode == ScanMode::Radar, Ordering::Relaxed);
    }

    pub fn forward_mm(&self) -> u16 {
        self.forward_mm.load(Ordering::Relaxed)
    }

    pub fn level(&self) -> ProximityLevel {
        ProximityLevel::new(self.level.load(Ordering::Relaxed))
    }

    pub fn is_warning(&self) -> bool {
        self.warning.load(Ordering::Relaxed)
    }

    /// Publishes the result of one sensing cycle; returns true if the level changed
    pub fn set_proximity(&self, forward_mm: f32, level: ProximityLevel, warning: bool) -> bool {
        self.forward_mm.store(forward_mm as u16, Ordering::Relaxed);
        self.warning.store(warning, Ordering::Relaxed);
        self.level.swap(level.get(), Ordering::Relaxed) != level.get()
    }
}

impl Default for SensorAggregate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let state = SensorAggregate::new();
        assert_eq!(state.feedback_mode(), FeedbackMode::Both);
        assert_eq!(state.scan_mode(), ScanMode::Simple);
        assert_eq!(state.forward_mm(), MAX_DISTANCE_MM);
        assert_eq!(state.level(), ProximityLevel::CLEAR);
    }

    #[test]
    fn proximity_reports_level_changes_only() {
        let state = SensorAggregate::new();
        assert!(state.set_proximity(600.4, ProximityLevel::new(4), true));
        assert!(!state.set_proximity(590.0, ProximityLevel::new(4), true));
        assert_eq!(state.forward_mm(), 590);
        assert!(state.is_warning());
    }

    #[test]
    fn feedback_and_scan_mode_round_trip() {
        let state = SensorAggregate::new();
        state.set_feedback_mode(FeedbackMode::VibrationOnly);
        state.set_scan_mode(ScanMode::Radar);
        assert_eq!(state.feedback_mode(), FeedbackMode::VibrationOnly);
        assert_eq!(state.scan_mode(), ScanMode::Radar);
    }
}
