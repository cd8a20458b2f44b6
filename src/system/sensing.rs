//! Sensing Loop
//!
//! One cycle of obstacle sensing: take a reading if the sensor has one, filter it,
//! evaluate the alerting and publish the result. In RADAR mode the sweep owns the
//! sensor and the cycle feeds the raw center reading of the radar table to the
//! alerting instead.
//!
//! The alerting is evaluated on every cycle, with or without a new reading, so the
//! buzzer and vibration duty cycles keep their timing.

use crate::system::alert::{AlertConfig, AlertEngine, ProximityLevel};
use crate::system::device::{FeedbackOutputs, RangeSensor};
use crate::system::health::{SensorId, SensorStatus, SharedHealth};
use crate::system::range_filter::{DistanceSample, FilterConfig, Ingest, RangeFilter, MAX_DISTANCE_MM};
use crate::system::scan::{RadarTable, CENTER_ANGLE};
use crate::system::state::SensorAggregate;
use core::fmt::Write;
use embassy_time::Instant;
use heapless::String;

/// Result of one sensing cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cycle {
    pub distance_mm: f32,
    pub level: ProximityLevel,
    pub level_changed: bool,
    /// The sensor was found stuck and reinitialized during this cycle
    pub sensor_reset: bool,
}

pub struct Sensing<'a, O: FeedbackOutputs> {
    filter: RangeFilter,
    alert: AlertEngine<O>,
    table: &'a RadarTable,
    state: &'a SensorAggregate,
    health: &'a SharedHealth,
}

impl<'a, O: FeedbackOutputs> Sensing<'a, O> {
    pub fn new(
        outputs: O,
        filter_config: FilterConfig,
        alert_config: AlertConfig,
        table: &'a RadarTable,
        state: &'a SensorAggregate,
        health: &'a SharedHealth,
    ) -> Self {
        Self {
            filter: RangeFilter::new(filter_config),
            alert: AlertEngine::new(outputs, alert_config),
            table,
            state,
            health,
        }
    }

    /// SIMPLE mode cycle
    pub fn sample<S: RangeSensor>(&mut self, sensor: &mut S, now: Instant) -> Cycle {
        let mut sensor_reset = false;
        if sensor.data_ready() {
            let raw = sensor.read();
            match self.filter.ingest(DistanceSample::new(raw, now)) {
                Ingest::Accepted => {
                    let mut value: String<16> = String::new();
                    let _ = write!(value, "{}mm", self.filter.current() as u16);
                    self.report(SensorStatus::Ok, Some(&value), None, now);
                }
                Ingest::Stuck => {
                    self.report(SensorStatus::Error, None, Some("stuck at max range"), now);
                }
                Ingest::ResetRequested => {
                    sensor.reinitialize();
                    sensor_reset = true;
                    self.report(SensorStatus::Timeout, None, Some("reinitialized after stuck"), now);
                }
            }
        }
        let distance_mm = self.filter.current();
        let mut cycle = self.evaluate(distance_mm, now);
        cycle.sensor_reset = sensor_reset;
        cycle
    }

    /// RADAR mode cycle, alerting follows the raw center reading
    pub fn radar_tick(&mut self, now: Instant) -> Cycle {
        let center = match self.table.distance(CENTER_ANGLE) {
            0 => MAX_DISTANCE_MM,
            millimeters => millimeters,
        };
        self.evaluate(center as f32, now)
    }

    /// Drops the filter history, used when the sensor is reinitialized on request
    pub fn reset_filter(&mut self, now: Instant) {
        self.filter.reset(now);
    }

    pub fn filter(&self) -> &RangeFilter {
        &self.filter
    }

    pub fn alert(&self) -> &AlertEngine<O> {
        &self.alert
    }

    fn evaluate(&mut self, distance_mm: f32, now: Instant) -> Cycle {
        self.alert.set_feedback_mode(self.state.feedback_mode());
        let level = self.alert.evaluate(distance_mm, now);
        let level_changed = self.state.set_proximity(distance_mm, level, self.alert.is_warning());
        Cycle {
            distance_mm,
            level,
            level_changed,
            sensor_reset: false,
        }
    }

    fn report(&self, status: SensorStatus, value: Option<&str>, error: Option<&str>, now: Instant) {
        self.health.lock(|health| {
            health
                .borrow_mut()
                .update(SensorId::Vl53l1x, status, value, error, now)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::alert::tests::RecordingOutputs;
    use crate::system::health::HealthRegistry;
    use crate::system::scan::tests::ScriptedSensor;
    use core::cell::RefCell;
    use embassy_sync::blocking_mutex::Mutex;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn simple_cycle_filters_and_reports() {
        let table = RadarTable::new();
        let state = SensorAggregate::new();
        let health: SharedHealth = Mutex::new(RefCell::new(HealthRegistry::new()));
        let mut sensing = Sensing::new(
            RecordingOutputs::default(),
            FilterConfig::new(),
            AlertConfig::new(),
            &table,
            &state,
            &health,
        );
        let mut sensor = ScriptedSensor::new(|n| if n < 8 { Some(1200) } else { None });
        for i in 0..10 {
            sensing.sample(&mut sensor, at(i * 20));
        }
        assert_eq!(sensor.reads, 8);
        assert_eq!(state.forward_mm(), 1200);
        assert_eq!(state.level(), ProximityLevel::new(2));
        health.lock(|health| {
            let health = health.borrow();
            let tof = health.sensor(SensorId::Vl53l1x);
            assert_eq!(tof.status(), SensorStatus::Ok);
            assert_eq!(tof.last_value(), "1200mm");
        });
    }

    #[test]
    fn radar_cycle_uses_the_center_reading() {
        let table = RadarTable::new();
        let state = SensorAggregate::new();
        let health: SharedHealth = Mutex::new(RefCell::new(HealthRegistry::new()));
        let mut sensing = Sensing::new(
            RecordingOutputs::default(),
            FilterConfig::new(),
            AlertConfig::new(),
            &table,
            &state,
            &health,
        );
        assert_eq!(sensing.radar_tick(at(0)).distance_mm, MAX_DISTANCE_MM as f32);
        table.record(CENTER_ANGLE, 450);
        table.record(10, 100);
        let cycle = sensing.radar_tick(at(20));
        assert_eq!(cycle.distance_mm, 450.0);
        assert_eq!(cycle.level, ProximityLevel::new(4));
        assert!(cycle.level_changed);
        assert_eq!(state.forward_mm(), 450);
    }

    #[test]
    fn stuck_sensor_is_reinitialized() {
        let table = RadarTable::new();
        let state = SensorAggregate::new();
        let health: SharedHealth = Mutex::new(RefCell::new(HealthRegistry::new()));
        let mut sensing = Sensing::new(
            RecordingOutputs::default(),
            FilterConfig::new(),
            AlertConfig::new(),
            &table,
            &state,
            &health,
        );
        let mut sensor = ScriptedSensor::new(|_| Some(3500));
        let mut resets = 0;
        for i in 0..60 {
            if sensing.sample(&mut sensor, at(i * 100)).sensor_reset {
                resets += 1;
            }
        }
        assert_eq!(resets, 1);
        assert_eq!(sensor.reinitialized, 1);
        health.lock(|health| {
            let health = health.borrow();
            let tof = health.sensor(SensorId::Vl53l1x);
            assert_eq!(tof.status(), SensorStatus::Ok);
            assert!(tof.error_count() >= 1);
        });
    }

    #[test]
    fn feedback_mode_follows_the_shared_state() {
        let table = RadarTable::new();
        let state = SensorAggregate::new();
        let health: SharedHealth = Mutex::new(RefCell::new(HealthRegistry::new()));
        let mut sensing = Sensing::new(
            RecordingOutputs::default(),
            FilterConfig::new(),
            AlertConfig::new(),
            &table,
            &state,
            &health,
        );
        state.set_feedback_mode(crate::system::alert::FeedbackMode::BuzzerOnly);
        sensing.radar_tick(at(0));
        assert_eq!(
            sensing.alert().feedback_mode(),
            crate::system::alert::FeedbackMode::BuzzerOnly
        );
    }
}
