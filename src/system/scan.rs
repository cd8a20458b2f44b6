//! Scan Modes
//!
//! SIMPLE mode ranges straight ahead with the sensor fixed at center. RADAR mode
//! hands the sensor to the sweep, which moves the servo from 0° to 180° in 1° steps,
//! takes a quick reading at every angle and starts over until it is told to stop.
//!
//! # Sweep Lifecycle
//! The sweep runs in its own task and idles until [`SweepControl::start`]. Stopping
//! is cooperative: [`SweepControl::stop`] raises a flag that the sweep checks once per
//! angle, then waits until the sweep has homed the servo and signalled that it is
//! done. Only then does SIMPLE mode take the sensor back. Both calls are idempotent,
//! there is never more than one sweep running.
//!
//! # Radar Table
//! One slot per angle, written only by the sweep and read lock-free by everyone
//! else. A slot holding 0 was never scanned; entries are not expired.

use crate::system::device::{Actuator, RangeSensor};
use crate::system::frame::{Direction, Telemetry, RADAR_CHUNK_LEN};
use crate::system::range_filter::{MAX_DISTANCE_MM, MIN_DISTANCE_MM};
use crate::system::telemetry::Uplink;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};

/// Number of scanned angles, 0° to 180° inclusive
pub const RADAR_ANGLES: usize = 181;

/// Servo rest position, also the angle feeding the alerting in RADAR mode
pub const CENTER_ANGLE: u8 = 90;

/// Safest angles below this are RIGHT, above `LEFT_LIMIT` LEFT
const RIGHT_LIMIT: u8 = 60;
const LEFT_LIMIT: u8 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanMode {
    #[default]
    Simple,
    Radar,
}

/// Per-angle distances of the most recent sweeps
pub struct RadarTable {
    distances: [AtomicU16; RADAR_ANGLES],
    current_angle: AtomicU8,
}

impl RadarTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const UNSCANNED: AtomicU16 = AtomicU16::new(0);
        Self {
            distances: [UNSCANNED; RADAR_ANGLES],
            current_angle: AtomicU8::new(CENTER_ANGLE),
        }
    }

    pub fn record(&self, angle: u8, millimeters: u16) {
        if let Some(slot) = self.distances.get(angle as usize) {
            slot.store(millimeters, Ordering::Relaxed);
            self.current_angle.store(angle, Ordering::Relaxed);
        }
    }

    /// Last distance seen at `angle`, 0 if never scanned
    pub fn distance(&self, angle: u8) -> u16 {
        self.distances
            .get(angle as usize)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    pub fn current_angle(&self) -> u8 {
        self.current_angle.load(Ordering::Relaxed)
    }

    /// Copies `out.len()` consecutive angles starting at `first`; missing angles read 0
    pub fn copy_range(&self, first: usize, out: &mut [u16]) {
        for (i, value) in out.iter_mut().enumerate() {
            *value = self
                .distances
                .get(first + i)
                .map_or(0, |slot| slot.load(Ordering::Relaxed));
        }
    }

    /// Angle with the most free space, bucketed into a direction
    ///
    /// Returns None until at least one angle was scanned.
    pub fn safest_direction(&self) -> Option<(Direction, u8)> {
        let mut best: Option<(u8, u16)> = None;
        for angle in 0..RADAR_ANGLES as u8 {
            let distance = self.distance(angle);
            if distance == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_distance)| distance > best_distance) {
                best = Some((angle, distance));
            }
        }
        best.map(|(angle, _)| {
            let direction = if angle < RIGHT_LIMIT {
                Direction::Right
            } else if angle > LEFT_LIMIT {
                Direction::Left
            } else {
                Direction::Center
            };
            (direction, angle)
        })
    }
}

impl Default for RadarTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Start/stop handshake between the mode owner and the sweep task
pub struct SweepControl {
    active: AtomicBool,
    stop_requested: AtomicBool,
    starts: AtomicU32,
    start: Signal<CriticalSectionRawMutex, ()>,
    stopped: Signal<CriticalSectionRawMutex, ()>,
}

impl SweepControl {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            start: Signal::new(),
            stopped: Signal::new(),
        }
    }

    /// Starts the sweep unless one is already active; returns true if it started
    pub fn start(&self) -> bool {
        if self.active.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop_requested.store(false, Ordering::Release);
        self.stopped.reset();
        self.starts.fetch_add(1, Ordering::Relaxed);
        self.start.signal(());
        true
    }

    /// Requests a stop and waits until the sweep has homed the servo
    pub async fn stop(&self) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.stop_requested.store(true, Ordering::Release);
        self.stopped.wait().await;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of sweeps started since boot
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::Relaxed)
    }

    async fn wait_for_start(&self) {
        self.start.wait().await;
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn finished(&self) {
        self.stop_requested.store(false, Ordering::Release);
        self.active.store(false, Ordering::Release);
        self.stopped.signal(());
    }
}

impl Default for SweepControl {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time per angle, includes servo travel and one sensor reading
    pub angle_interval: Duration,
    /// Value recorded when no valid reading is available
    pub sentinel_mm: u16,
}

impl SweepConfig {
    pub const fn new() -> Self {
        Self {
            angle_interval: Duration::from_millis(22),
            sentinel_mm: MAX_DISTANCE_MM,
        }
    }

    pub const fn set_angle_interval(mut self, angle_interval: Duration) -> Self {
        self.angle_interval = angle_interval;
        self
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of scanning one angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SweepStep {
    pub angle: u8,
    pub millimeters: u16,
    /// True on the 180° step, the next step starts over at 0°
    pub completed_sweep: bool,
}

/// The radar sweep, owning the scan actuator
pub struct RadarSweep<'a, A: Actuator> {
    actuator: A,
    table: &'a RadarTable,
    control: &'a SweepControl,
    config: SweepConfig,
    angle: u8,
}

impl<'a, A: Actuator> RadarSweep<'a, A> {
    pub fn new(actuator: A, table: &'a RadarTable, control: &'a SweepControl, config: SweepConfig) -> Self {
        Self {
            actuator,
            table,
            control,
            config,
            angle: 0,
        }
    }

    /// Moves the servo to center
    pub fn home(&mut self) {
        self.actuator.move_to(CENTER_ANGLE);
    }

    /// Scans the current angle and advances to the next one
    pub fn step<S: RangeSensor>(&mut self, sensor: &mut S) -> SweepStep {
        let angle = self.angle;
        self.actuator.move_to(angle);
        let millimeters = self.quick_read(sensor);
        self.table.record(angle, millimeters);

        let completed_sweep = angle as usize + 1 >= RADAR_ANGLES;
        self.angle = if completed_sweep { 0 } else { angle + 1 };
        SweepStep {
            angle,
            millimeters,
            completed_sweep,
        }
    }

    /// Serves start requests forever
    pub async fn run<S: RangeSensor, const N: usize>(
        &mut self,
        sensor: &Mutex<CriticalSectionRawMutex, S>,
        uplink: &Uplink<'_, N>,
    ) {
        loop {
            self.control.wait_for_start().await;
            self.sweep_until_stopped(sensor, uplink).await;
        }
    }

    /// One RADAR activation: home, sweep until stop is requested, home again
    pub async fn sweep_until_stopped<S: RangeSensor, const N: usize>(
        &mut self,
        sensor: &Mutex<CriticalSectionRawMutex, S>,
        uplink: &Uplink<'_, N>,
    ) {
        info!("radar sweep started");
        self.home();
        self.angle = 0;
        let mut ticker = Ticker::every(self.config.angle_interval);

        while !self.control.stop_requested() {
            let step = {
                let mut sensor = sensor.lock().await;
                self.step(&mut *sensor)
            };
            uplink.publish(&Telemetry::RadarLive {
                angle: step.angle,
                millimeters: step.millimeters,
            });
            if step.completed_sweep {
                self.publish_summary(uplink);
            }
            ticker.next().await;
        }

        self.home();
        info!("radar sweep stopped");
        self.control.finished();
    }

    fn publish_summary<const N: usize>(&self, uplink: &Uplink<'_, N>) {
        debug!("radar sweep completed");
        if let Some((direction, angle)) = self.table.safest_direction() {
            uplink.publish(&Telemetry::Safest { direction, angle });
        }
    }

    fn quick_read<S: RangeSensor>(&self, sensor: &mut S) -> u16 {
        if !sensor.data_ready() {
            return self.config.sentinel_mm;
        }
        let millimeters = sensor.read();
        if (MIN_DISTANCE_MM..=MAX_DISTANCE_MM).contains(&millimeters) {
            millimeters
        } else {
            self.config.sentinel_mm
        }
    }
}

/// Publishes the whole radar table as `RADARn:` chunk lines
pub fn publish_table<const N: usize>(table: &RadarTable, uplink: &Uplink<'_, N>) -> usize {
    let mut published = 0;
    let mut distances = [0u16; RADAR_CHUNK_LEN];
    for (index, first) in (0..RADAR_ANGLES).step_by(RADAR_CHUNK_LEN).enumerate() {
        let len = RADAR_CHUNK_LEN.min(RADAR_ANGLES - first);
        table.copy_range(first, &mut distances[..len]);
        if uplink.publish(&Telemetry::RadarChunk {
            index: index as u8,
            distances: &distances[..len],
        }) {
            published += 1;
        }
    }
    published
}

/// Observable state of the mode owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanSnapshot {
    pub mode: ScanMode,
    pub sweep_active: bool,
    pub sweep_starts: u32,
}

/// Owns the scan mode and drives the sweep lifecycle
pub struct ScanController<'a> {
    mode: ScanMode,
    sweep: &'a SweepControl,
}

impl<'a> ScanController<'a> {
    pub const fn new(sweep: &'a SweepControl) -> Self {
        Self {
            mode: ScanMode::Simple,
            sweep,
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Enters RADAR mode; returns false if already there
    pub fn switch_to_radar(&mut self) -> bool {
        if self.mode == ScanMode::Radar {
            return false;
        }
        info!("switching to RADAR mode");
        self.mode = ScanMode::Radar;
        self.sweep.start();
        true
    }

    /// Leaves RADAR mode, returns once the sweep has stopped and homed the servo
    pub async fn switch_to_simple(&mut self) -> bool {
        if self.mode == ScanMode::Simple {
            return false;
        }
        info!("switching to SIMPLE mode");
        self.sweep.stop().await;
        self.mode = ScanMode::Simple;
        true
    }

    pub async fn switch_to(&mut self, mode: ScanMode) -> bool {
        match mode {
            ScanMode::Radar => self.switch_to_radar(),
            ScanMode::Simple => self.switch_to_simple().await,
        }
    }

    pub async fn toggle(&mut self) -> ScanMode {
        let next = match self.mode {
            ScanMode::Simple => ScanMode::Radar,
            ScanMode::Radar => ScanMode::Simple,
        };
        self.switch_to(next).await;
        self.mode
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            mode: self.mode,
            sweep_active: self.sweep.is_active(),
            sweep_starts: self.sweep.starts(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::system::link::{LinkConfig, LinkSession};
    use crate::system::telemetry::TelemetryQueue;
    use embassy_futures::block_on;
    use embassy_futures::select::select;
    use embassy_time::Timer;

    /// Servo fake remembering every commanded angle
    #[derive(Default)]
    pub(crate) struct RecordingActuator {
        pub moves: std::vec::Vec<u8>,
    }

    impl Actuator for &mut RecordingActuator {
        fn move_to(&mut self, angle_degrees: u8) {
            self.moves.push(angle_degrees);
        }
    }

    /// Sensor fake returning readings from a function of the read count
    pub(crate) struct ScriptedSensor<F: FnMut(u32) -> Option<u16>> {
        pub reads: u32,
        pub reinitialized: u32,
        pub script: F,
        pending: Option<u16>,
    }

    impl<F: FnMut(u32) -> Option<u16>> ScriptedSensor<F> {
        pub fn new(script: F) -> Self {
            Self {
                reads: 0,
                reinitialized: 0,
                script,
                pending: None,
            }
        }
    }

    impl<F: FnMut(u32) -> Option<u16>> RangeSensor for ScriptedSensor<F> {
        fn data_ready(&mut self) -> bool {
            if self.pending.is_none() {
                self.pending = (self.script)(self.reads);
            }
            self.pending.is_some()
        }

        fn read(&mut self) -> u16 {
            self.reads += 1;
            self.pending.take().unwrap_or(0)
        }

        fn reinitialize(&mut self) {
            self.reinitialized += 1;
        }
    }

    #[test]
    fn one_sweep_covers_every_angle_exactly_once() {
        let table = RadarTable::new();
        let control = SweepControl::new();
        let mut actuator = RecordingActuator::default();
        let mut sensor = ScriptedSensor::new(|n| Some(500 + n as u16));
        {
            let mut sweep = RadarSweep::new(&mut actuator, &table, &control, SweepConfig::new());
            let mut completed = 0;
            for i in 0..RADAR_ANGLES {
                let step = sweep.step(&mut sensor);
                assert_eq!(step.angle as usize, i);
                if step.completed_sweep {
                    completed += 1;
                }
            }
            assert_eq!(completed, 1);
            // wraps to 0
            assert_eq!(sweep.step(&mut sensor).angle, 0);
        }
        let expected: std::vec::Vec<u8> = (0..=180).chain(0..1).collect();
        assert_eq!(actuator.moves, expected);
        for angle in 1..=180u8 {
            assert_eq!(table.distance(angle), 500 + angle as u16);
        }
    }

    #[test]
    fn missing_or_invalid_readings_record_the_sentinel() {
        let table = RadarTable::new();
        let control = SweepControl::new();
        let mut actuator = RecordingActuator::default();
        let mut sensor = ScriptedSensor::new(|n| match n {
            0 => Some(10),
            1 => Some(4000),
            _ => None,
        });
        let mut sweep = RadarSweep::new(&mut actuator, &table, &control, SweepConfig::new());
        for _ in 0..3 {
            sweep.step(&mut sensor);
        }
        assert_eq!(table.distance(0), MAX_DISTANCE_MM);
        assert_eq!(table.distance(1), MAX_DISTANCE_MM);
        assert_eq!(table.distance(2), MAX_DISTANCE_MM);
        assert_eq!(table.distance(3), 0);
    }

    #[test]
    fn safest_direction_buckets() {
        let table = RadarTable::new();
        assert_eq!(table.safest_direction(), None);
        for angle in 0..RADAR_ANGLES as u8 {
            table.record(angle, 800);
        }
        table.record(30, 3000);
        assert_eq!(table.safest_direction(), Some((Direction::Right, 30)));
        table.record(150, 3200);
        assert_eq!(table.safest_direction(), Some((Direction::Left, 150)));
        table.record(90, 3400);
        assert_eq!(table.safest_direction(), Some((Direction::Center, 90)));
    }

    #[test]
    fn mode_switches_are_idempotent() {
        let table = RadarTable::new();
        let control = SweepControl::new();
        let queue = TelemetryQueue::<4>::new();
        let link = LinkSession::new(LinkConfig::new());
        let uplink = Uplink::new(&queue, &link);
        let sensor = Mutex::new(ScriptedSensor::new(|_| Some(1200)));
        let mut actuator = RecordingActuator::default();
        let mut controller = ScanController::new(&control);

        {
            let mut sweep = RadarSweep::new(
                &mut actuator,
                &table,
                &control,
                SweepConfig::new().set_angle_interval(Duration::from_millis(1)),
            );
            block_on(select(sweep.run(&sensor, &uplink), async {
                assert!(controller.switch_to_radar());
                let after_first = controller.snapshot();
                assert!(!controller.switch_to_radar());
                assert_eq!(controller.snapshot(), after_first);
                assert_eq!(after_first.sweep_starts, 1);
                assert!(after_first.sweep_active);

                Timer::after_millis(20).await;

                assert!(controller.switch_to_simple().await);
                let stopped = controller.snapshot();
                assert_eq!(stopped.mode, ScanMode::Simple);
                assert!(!stopped.sweep_active);
                assert!(!controller.switch_to_simple().await);
                assert_eq!(controller.snapshot(), stopped);
            }));
        }
        // homed on start and on stop
        assert_eq!(actuator.moves.first(), Some(&CENTER_ANGLE));
        assert_eq!(actuator.moves.last(), Some(&CENTER_ANGLE));
        assert!(table.distance(0) > 0);
    }

    #[test]
    fn stop_without_sweep_returns_immediately() {
        let control = SweepControl::new();
        block_on(control.stop());
        assert!(!control.is_active());
    }
}
