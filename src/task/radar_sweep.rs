//! Radar Sweep
//!
//! Sweeps the ToF sensor across 180° on a hobby servo while RADAR mode is active. The
//! servo runs on PIO PWM, the RP2350 PWM slices are not needed for it.

use crate::task::resources::{Irqs, SweepServoResources};
use crate::task::tof_sense::SharedSensor;
use crate::task::{uplink, RADAR_TABLE, SWEEP_CONTROL};
use core::time::Duration;
use defmt::info;
use embassy_rp::pio::{Instance, Pio};
use embassy_rp::pio_programs::pwm::{PioPwm, PioPwmProgram};
use smart_cane::system::device::Actuator;
use smart_cane::system::scan::{RadarSweep, SweepConfig};

/// SG90 on the cane's sweep mount: 50 Hz frame, full 180° travel between 0.5 ms and 2.4 ms
const SG90: ServoCalibration = ServoCalibration {
    frame: Duration::from_millis(20),
    min_pulse: Duration::from_micros(500),
    max_pulse: Duration::from_micros(2400),
    travel_degrees: 180,
};

#[derive(Clone, Copy)]
struct ServoCalibration {
    frame: Duration,
    min_pulse: Duration,
    max_pulse: Duration,
    travel_degrees: u8,
}

impl ServoCalibration {
    /// Pulse width for `degree`, linear between the end points, clamped to the travel
    fn pulse_width(&self, degree: u8) -> Duration {
        let degree = degree.min(self.travel_degrees) as u64;
        let min = self.min_pulse.as_micros() as u64;
        let span = (self.max_pulse.as_micros() as u64).saturating_sub(min);
        Duration::from_micros(min + degree * span / self.travel_degrees.max(1) as u64)
    }
}

/// Servo that points the ToF sensor, driven by a PIO PWM state machine
pub struct SweepServo<'d, T: Instance, const SM: usize> {
    pwm: PioPwm<'d, T, SM>,
    calibration: ServoCalibration,
}

impl<'d, T: Instance, const SM: usize> SweepServo<'d, T, SM> {
    fn new(mut pwm: PioPwm<'d, T, SM>, calibration: ServoCalibration) -> Self {
        pwm.set_period(calibration.frame);
        pwm.start();
        Self { pwm, calibration }
    }
}

impl<T: Instance, const SM: usize> Actuator for SweepServo<'_, T, SM> {
    fn move_to(&mut self, angle_degrees: u8) {
        self.pwm.write(self.calibration.pulse_width(angle_degrees));
    }
}

#[embassy_executor::task]
pub async fn radar_sweep(s: SweepServoResources, sensor: &'static SharedSensor) {
    let Pio { mut common, sm0, .. } = Pio::new(s.pio, Irqs);

    let prg = PioPwmProgram::new(&mut common);
    let servo = SweepServo::new(PioPwm::new(&mut common, sm0, s.pin, &prg), SG90);

    let uplink = uplink();
    let mut sweep = RadarSweep::new(servo, &RADAR_TABLE, &SWEEP_CONTROL, SweepConfig::new());
    sweep.home();
    info!("radar sweep ready");
    sweep.run(sensor, &uplink).await;
}
