//! Proximity Alerting
//!
//! Maps the filtered distance onto a proximity level and drives the buzzer and the
//! vibration motors from it.
//!
//! # Levels
//! | level | distance   | buzzer on/off (ms) |
//! |-------|------------|--------------------|
//! | 0     | ≥ 180cm    | continuously on    |
//! | 1     | ≥ 140cm    | 920 / 100          |
//! | 2     | ≥ 100cm    | 520 / 100          |
//! | 3     | ≥ 70cm     | 320 / 100          |
//! | 4     | ≥ 40cm     | 120 / 100          |
//! | 5     | ≥ 30cm     | 40 / 100           |
//! | 6     | < 30cm     | 80 / 1920          |
//!
//! Level 0 keeps the buzzer on so the user can tell the device is alive and the path
//! is clear. For all other levels the vibration motors run in opposite phase to the
//! buzzer.
//!
//! A level change is only accepted once the distance is a hysteresis margin past the
//! boundary, in the direction of travel. This keeps the output from flickering when
//! the user stands right at a threshold.
//!
//! # Critical Pulse
//! At or below the critical distance both outputs fire a short pulse on top of the
//! duty cycle. The pulse re-arms after a cooldown so it does not retrigger on every
//! sample.

use crate::system::device::FeedbackOutputs;
use embassy_time::{Duration, Instant};

/// Level thresholds in centimeters, index = level
const LEVEL_THRESHOLDS_CM: [f32; 6] = [180.0, 140.0, 100.0, 70.0, 40.0, 30.0];

/// Buzzer on time per level in milliseconds
const ON_TIMES_MS: [u64; 7] = [0, 920, 520, 320, 120, 40, 80];

/// Buzzer off time per level in milliseconds
const OFF_TIMES_MS: [u64; 7] = [0, 100, 100, 100, 100, 100, 1920];

/// Discrete proximity level, 0 = clear ..= 6 = critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProximityLevel(u8);

impl ProximityLevel {
    pub const CLEAR: Self = Self(0);
    pub const CRITICAL: Self = Self(6);

    /// Creates a level, saturating at critical
    pub const fn new(level: u8) -> Self {
        if level > 6 {
            Self::CRITICAL
        } else {
            Self(level)
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Classifies a distance with all thresholds shifted by `offset_cm`
    fn classify(distance_cm: f32, offset_cm: f32) -> Self {
        LEVEL_THRESHOLDS_CM
            .iter()
            .position(|threshold| distance_cm >= threshold + offset_cm)
            .map_or(Self::CRITICAL, |level| Self(level as u8))
    }

    fn duty(self) -> (Duration, Duration) {
        let index = self.0 as usize;
        (
            Duration::from_millis(ON_TIMES_MS[index]),
            Duration::from_millis(OFF_TIMES_MS[index]),
        )
    }
}

/// Which physical outputs the alerting may drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedbackMode {
    #[default]
    Both,
    BuzzerOnly,
    VibrationOnly,
}

impl FeedbackMode {
    /// Decodes the stored mode, unknown codes fall back to `Both`
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::BuzzerOnly,
            2 => Self::VibrationOnly,
            _ => Self::Both,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Both => 0,
            Self::BuzzerOnly => 1,
            Self::VibrationOnly => 2,
        }
    }

    pub const fn drives_buzzer(self) -> bool {
        matches!(self, Self::Both | Self::BuzzerOnly)
    }

    pub const fn drives_vibration(self) -> bool {
        matches!(self, Self::Both | Self::VibrationOnly)
    }
}

/// Alerting thresholds and timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertConfig {
    pub hysteresis_cm: f32,
    pub critical_mm: f32,
    pub warning_mm: f32,
    pub pulse: Duration,
    pub rearm: Duration,
}

impl AlertConfig {
    pub const fn new() -> Self {
        Self {
            hysteresis_cm: 10.0,
            critical_mm: 300.0,
            warning_mm: 700.0,
            pulse: Duration::from_millis(100),
            rearm: Duration::from_secs(1),
        }
    }

    pub const fn set_hysteresis_cm(mut self, hysteresis_cm: f32) -> Self {
        self.hysteresis_cm = hysteresis_cm;
        self
    }

    pub const fn set_critical_mm(mut self, critical_mm: f32) -> Self {
        self.critical_mm = critical_mm;
        self
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Hysteresis level tracking plus buzzer/vibration duty cycling
pub struct AlertEngine<O: FeedbackOutputs> {
    outputs: O,
    config: AlertConfig,
    mode: FeedbackMode,
    /// None until the first evaluation
    level: Option<ProximityLevel>,
    buzzer_on: bool,
    phase_started: Instant,
    pulse_started: Option<Instant>,
    last_critical: Option<Instant>,
    critical_pulses: u32,
    warning: bool,
}

impl<O: FeedbackOutputs> AlertEngine<O> {
    pub fn new(outputs: O, config: AlertConfig) -> Self {
        Self {
            outputs,
            config,
            mode: FeedbackMode::Both,
            level: None,
            buzzer_on: false,
            phase_started: Instant::from_ticks(0),
            pulse_started: None,
            last_critical: None,
            critical_pulses: 0,
            warning: false,
        }
    }

    /// Classifies `distance_mm` and updates the outputs for `now`
    pub fn evaluate(&mut self, distance_mm: f32, now: Instant) -> ProximityLevel {
        self.check_critical(distance_mm, now);

        let level = self.next_level(distance_mm / 10.0);
        if self.level != Some(level) {
            debug!("proximity level {} at {} mm", level.get(), distance_mm as u32);
            self.level = Some(level);
            self.buzzer_on = false;
            self.phase_started = now;
            self.drive(false, false);
        }

        if self.pulse_active(now) {
            self.drive(true, true);
            return level;
        }

        if level == ProximityLevel::CLEAR {
            self.drive(true, false);
            return level;
        }

        let (on_time, off_time) = level.duty();
        let elapsed = now.saturating_duration_since(self.phase_started);
        if self.buzzer_on && elapsed >= on_time {
            self.buzzer_on = false;
            self.phase_started = now;
        } else if !self.buzzer_on && elapsed >= off_time {
            self.buzzer_on = true;
            self.phase_started = now;
        }
        self.drive(self.buzzer_on, !self.buzzer_on);

        level
    }

    /// Changes output routing; both outputs are switched off and the phase restarts
    pub fn set_feedback_mode(&mut self, mode: FeedbackMode) {
        if mode == self.mode {
            return;
        }
        info!("feedback mode {:?}", mode);
        self.outputs.set_buzzer(false);
        self.outputs.set_vibration(false);
        self.mode = mode;
        self.buzzer_on = false;
        self.level = None;
    }

    pub fn feedback_mode(&self) -> FeedbackMode {
        self.mode
    }

    /// Last evaluated level, clear before the first evaluation
    pub fn level(&self) -> ProximityLevel {
        self.level.unwrap_or(ProximityLevel::CLEAR)
    }

    /// True while the last distance was inside the warning distance
    pub fn is_warning(&self) -> bool {
        self.warning
    }

    /// Number of critical pulses fired since start
    pub fn critical_pulses(&self) -> u32 {
        self.critical_pulses
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    fn next_level(&self, distance_cm: f32) -> ProximityLevel {
        let previous = self.level.unwrap_or(ProximityLevel::CLEAR);
        let nominal = ProximityLevel::classify(distance_cm, 0.0);
        if nominal > previous {
            // moving closer, the boundary has to be passed by the margin
            ProximityLevel::classify(distance_cm, -self.config.hysteresis_cm)
        } else if nominal < previous {
            ProximityLevel::classify(distance_cm, self.config.hysteresis_cm)
        } else {
            nominal
        }
    }

    fn check_critical(&mut self, distance_mm: f32, now: Instant) {
        if let Some(at) = self.last_critical {
            if now.saturating_duration_since(at) > self.config.rearm {
                self.last_critical = None;
            }
        }
        if distance_mm <= self.config.critical_mm && self.last_critical.is_none() {
            warn!("critical distance {} mm", distance_mm as u32);
            self.last_critical = Some(now);
            self.pulse_started = Some(now);
            self.critical_pulses = self.critical_pulses.wrapping_add(1);
        }
        self.warning = distance_mm < self.config.warning_mm;
    }

    fn pulse_active(&mut self, now: Instant) -> bool {
        match self.pulse_started {
            Some(at) if now.saturating_duration_since(at) < self.config.pulse => true,
            Some(_) => {
                self.pulse_started = None;
                false
            }
            None => false,
        }
    }

    fn drive(&mut self, buzzer: bool, vibration: bool) {
        if self.mode.drives_buzzer() {
            self.outputs.set_buzzer(buzzer);
        }
        if self.mode.drives_vibration() {
            self.outputs.set_vibration(vibration);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records the last state of each output
    #[derive(Default)]
    pub(crate) struct RecordingOutputs {
        pub buzzer: Option<bool>,
        pub vibration: Option<bool>,
        pub buzzer_writes: u32,
        pub vibration_writes: u32,
    }

    impl FeedbackOutputs for RecordingOutputs {
        fn set_buzzer(&mut self, on: bool) {
            self.buzzer = Some(on);
            self.buzzer_writes += 1;
        }

        fn set_vibration(&mut self, on: bool) {
            self.vibration = Some(on);
            self.vibration_writes += 1;
        }
    }

    fn engine() -> AlertEngine<RecordingOutputs> {
        AlertEngine::new(RecordingOutputs::default(), AlertConfig::new())
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn nominal_levels() {
        let cases = [
            (2500.0, 0),
            (1800.0, 0),
            (1500.0, 1),
            (1200.0, 2),
            (800.0, 3),
            (500.0, 4),
            (350.0, 5),
            (200.0, 6),
        ];
        for (distance_mm, expected) in cases {
            assert_eq!(
                ProximityLevel::classify(distance_mm / 10.0, 0.0),
                ProximityLevel::new(expected),
                "{distance_mm} mm"
            );
        }
    }

    #[test]
    fn approaching_needs_to_pass_the_margin() {
        let mut alert = engine();
        assert_eq!(alert.evaluate(800.0, at(0)).get(), 3);
        // nominally level 4 but within 10cm of the 70cm boundary
        assert_eq!(alert.evaluate(650.0, at(20)).get(), 3);
        assert_eq!(alert.evaluate(590.0, at(40)).get(), 4);
    }

    #[test]
    fn retreating_needs_to_pass_the_margin() {
        let mut alert = engine();
        assert_eq!(alert.evaluate(500.0, at(0)).get(), 4);
        assert_eq!(alert.evaluate(750.0, at(20)).get(), 4);
        assert_eq!(alert.evaluate(810.0, at(40)).get(), 3);
    }

    #[test]
    fn no_flicker_around_a_boundary() {
        let mut alert = engine();
        alert.evaluate(750.0, at(0));
        let mut previous = alert.level();
        let mut changes = 0;
        for i in 0..40u64 {
            let distance = if i % 2 == 0 { 680.0 } else { 720.0 };
            let level = alert.evaluate(distance, at(20 + i * 20));
            if level != previous {
                changes += 1;
                previous = level;
            }
        }
        assert!(changes <= 1, "level toggled {changes} times");
    }

    #[test]
    fn clear_path_keeps_buzzer_on() {
        let mut alert = engine();
        alert.evaluate(3000.0, at(0));
        alert.evaluate(3000.0, at(500));
        assert_eq!(alert.outputs().buzzer, Some(true));
        assert_eq!(alert.outputs().vibration, Some(false));
    }

    #[test]
    fn duty_cycle_alternates_outputs() {
        let mut alert = engine();
        // level 1: 920 on / 100 off, phase starts off
        alert.evaluate(1500.0, at(0));
        assert_eq!(alert.outputs().buzzer, Some(false));
        assert_eq!(alert.outputs().vibration, Some(true));

        alert.evaluate(1500.0, at(100));
        assert_eq!(alert.outputs().buzzer, Some(true));
        assert_eq!(alert.outputs().vibration, Some(false));

        alert.evaluate(1500.0, at(500));
        assert_eq!(alert.outputs().buzzer, Some(true));

        alert.evaluate(1500.0, at(1020));
        assert_eq!(alert.outputs().buzzer, Some(false));
        assert_eq!(alert.outputs().vibration, Some(true));
    }

    #[test]
    fn level_change_restarts_the_phase() {
        let mut alert = engine();
        alert.evaluate(1500.0, at(0));
        alert.evaluate(1500.0, at(100));
        assert_eq!(alert.outputs().buzzer, Some(true));
        // jump to level 4, buzzer off immediately, next on only after the off time
        alert.evaluate(500.0, at(150));
        assert_eq!(alert.outputs().buzzer, Some(false));
        alert.evaluate(500.0, at(200));
        assert_eq!(alert.outputs().buzzer, Some(false));
        alert.evaluate(500.0, at(250));
        assert_eq!(alert.outputs().buzzer, Some(true));
    }

    #[test]
    fn critical_pulse_fires_once_per_cooldown() {
        let mut alert = engine();
        alert.evaluate(280.0, at(0));
        assert_eq!(alert.critical_pulses(), 1);
        assert_eq!(alert.outputs().buzzer, Some(true));
        assert_eq!(alert.outputs().vibration, Some(true));

        for i in 1..10 {
            alert.evaluate(280.0, at(i * 50));
        }
        assert_eq!(alert.critical_pulses(), 1);

        // pulse over, the duty cycle drives the outputs in opposite phase again
        alert.evaluate(280.0, at(600));
        assert_ne!(alert.outputs().buzzer, alert.outputs().vibration);

        alert.evaluate(280.0, at(1050));
        assert_eq!(alert.critical_pulses(), 2);
    }

    #[test]
    fn warning_does_not_hold_back_the_critical_pulse() {
        let mut alert = engine();
        alert.evaluate(600.0, at(0));
        assert!(alert.is_warning());
        alert.evaluate(250.0, at(30));
        assert_eq!(alert.critical_pulses(), 1);
    }

    #[test]
    fn feedback_mode_routes_writes() {
        let mut alert = engine();
        alert.set_feedback_mode(FeedbackMode::BuzzerOnly);
        let vibration_writes = alert.outputs().vibration_writes;
        alert.evaluate(1500.0, at(0));
        alert.evaluate(1500.0, at(100));
        alert.evaluate(250.0, at(150));
        assert_eq!(alert.outputs().vibration_writes, vibration_writes);
        assert_eq!(alert.outputs().vibration, Some(false));

        alert.set_feedback_mode(FeedbackMode::VibrationOnly);
        let buzzer_writes = alert.outputs().buzzer_writes;
        alert.evaluate(3000.0, at(2000));
        alert.evaluate(3000.0, at(2100));
        assert_eq!(alert.outputs().buzzer_writes, buzzer_writes);
    }

    #[test]
    fn unknown_feedback_code_falls_back_to_both() {
        assert_eq!(FeedbackMode::from_code(7), FeedbackMode::Both);
        assert_eq!(FeedbackMode::from_code(2), FeedbackMode::VibrationOnly);
        assert_eq!(FeedbackMode::from_code(FeedbackMode::BuzzerOnly.code()), FeedbackMode::BuzzerOnly);
    }
}
