//! ToF Sensing
//!
//! The main sensing and alerting loop. It owns the scan mode: in SIMPLE mode it reads
//! the VL53L1X itself, in RADAR mode the sweep task reads the sensor and this loop
//! alerts on the center reading. Alerting runs every cycle either way.

use crate::task::resources::{FeedbackResources, TofSensorResources};
use crate::task::{uplink, HEALTH, RADAR_TABLE, SWEEP_CONTROL};
use defmt::{info, warn};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::i2c::{self, Blocking, I2c};
use embassy_rp::peripherals::I2C0;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use smart_cane::system::alert::AlertConfig;
use smart_cane::system::device::{FeedbackOutputs, RangeSensor};
use smart_cane::system::event::{self, Events, ScanRequest};
use smart_cane::system::frame::Telemetry;
use smart_cane::system::health::{SensorId, SensorStatus};
use smart_cane::system::range_filter::{FilterConfig, MAX_DISTANCE_MM};
use smart_cane::system::scan::{ScanController, ScanMode};
use smart_cane::system::sensing::Sensing;
use smart_cane::system::state::SENSOR_STATE;
use vl53l1x_uld::{DistanceMode, IOVoltage, VL53L1X};

/// Loop period, shorter than the ranging period so no reading is missed
const SENSE_INTERVAL: Duration = Duration::from_millis(10);

/// Long range mode timing budget, also used as the inter-measurement period
const TIMING_BUDGET_MS: u16 = 33;

/// ToF sensor shared between this loop and the radar sweep
pub type SharedSensor = Mutex<CriticalSectionRawMutex, Vl53l1xSensor>;

/// VL53L1X in continuous long range mode
pub struct Vl53l1xSensor {
    driver: VL53L1X<I2c<'static, I2C0, Blocking>>,
    ranging: bool,
}

impl Vl53l1xSensor {
    pub fn new(r: TofSensorResources) -> Self {
        let mut config = i2c::Config::default();
        config.frequency = 400_000;
        let bus = I2c::new_blocking(r.i2c, r.scl_pin, r.sda_pin, config);
        let mut sensor = Self {
            driver: VL53L1X::new(bus, vl53l1x_uld::DEFAULT_ADDRESS),
            ranging: false,
        };
        sensor.start();
        sensor
    }

    /// True while the sensor is initialized and ranging
    pub fn is_ranging(&self) -> bool {
        self.ranging
    }

    fn start(&mut self) {
        self.ranging = self.driver.init(IOVoltage::Volt2_8).is_ok()
            && self.driver.set_distance_mode(DistanceMode::Long).is_ok()
            && self.driver.set_timing_budget_ms(TIMING_BUDGET_MS).is_ok()
            && self.driver.set_inter_measurement_period_ms(TIMING_BUDGET_MS).is_ok()
            && self.driver.start_ranging().is_ok();
        if self.ranging {
            info!("VL53L1X ranging in long mode");
        } else {
            warn!("VL53L1X init failed");
        }
    }
}

impl RangeSensor for Vl53l1xSensor {
    fn data_ready(&mut self) -> bool {
        self.ranging && self.driver.is_data_ready().unwrap_or(false)
    }

    fn read(&mut self) -> u16 {
        let distance = self.driver.get_distance().unwrap_or(MAX_DISTANCE_MM);
        if self.driver.clear_interrupt().is_err() {
            warn!("VL53L1X interrupt clear failed");
        }
        distance
    }

    fn reinitialize(&mut self) {
        if self.driver.stop_ranging().is_err() {
            warn!("VL53L1X stop ranging failed");
        }
        self.start();
    }
}

/// Buzzer and both vibration motors
pub struct FeedbackPins {
    buzzer: Output<'static>,
    vibration: [Output<'static>; 2],
}

impl FeedbackPins {
    pub fn new(r: FeedbackResources) -> Self {
        Self {
            buzzer: Output::new(r.buzzer_pin, Level::Low),
            vibration: [
                Output::new(r.vibration_left_pin, Level::Low),
                Output::new(r.vibration_right_pin, Level::Low),
            ],
        }
    }
}

impl FeedbackOutputs for FeedbackPins {
    fn set_buzzer(&mut self, on: bool) {
        self.buzzer.set_level(Level::from(on));
    }

    fn set_vibration(&mut self, on: bool) {
        for motor in self.vibration.iter_mut() {
            motor.set_level(Level::from(on));
        }
    }
}

#[embassy_executor::task]
pub async fn tof_sense(sensor: &'static SharedSensor, r: FeedbackResources) {
    let mut sensing = Sensing::new(
        FeedbackPins::new(r),
        FilterConfig::new(),
        AlertConfig::new(),
        &RADAR_TABLE,
        &SENSOR_STATE,
        &HEALTH,
    );
    let mut scan = ScanController::new(&SWEEP_CONTROL);
    let uplink = uplink();

    if !sensor.lock().await.is_ranging() {
        HEALTH.lock(|health| {
            health.borrow_mut().update(
                SensorId::Vl53l1x,
                SensorStatus::InitFailed,
                None,
                Some("init failed"),
                Instant::now(),
            )
        });
    }

    info!("ToF sensing started");
    let mut ticker = Ticker::every(SENSE_INTERVAL);
    loop {
        if let Some(request) = event::take_scan_request() {
            let mode = match request {
                ScanRequest::Set(mode) => {
                    scan.switch_to(mode).await;
                    scan.mode()
                }
                ScanRequest::Toggle => scan.toggle().await,
            };
            SENSOR_STATE.set_scan_mode(mode);
            uplink.publish(&Telemetry::TofMode(mode == ScanMode::Radar));
            event::try_send(Events::ScanModeChanged(mode));
        }

        if event::take_sensor_reset() {
            info!("ToF reset requested");
            sensor.lock().await.reinitialize();
            sensing.reset_filter(Instant::now());
        }

        let cycle = match scan.mode() {
            ScanMode::Simple => {
                let mut sensor = sensor.lock().await;
                sensing.sample(&mut *sensor, Instant::now())
            }
            ScanMode::Radar => sensing.radar_tick(Instant::now()),
        };
        if cycle.level_changed {
            event::try_send(Events::ProximityChanged(cycle.level));
        }
        if cycle.sensor_reset {
            event::try_send(Events::SensorReset);
        }

        ticker.next().await;
    }
}
