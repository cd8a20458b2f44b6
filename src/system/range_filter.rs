//! Range Filter
//!
//! Turns noisy raw ToF readings into a stable distance estimate.
//!
//! # Signal Processing
//! - 5 sample moving median rejects single-sample spikes
//! - the first 8 accepted samples seed the estimate by plain averaging
//! - afterwards an adaptive exponential moving average runs over the median output
//!
//! # Safety Rules
//! - A reading that appears at least 25mm closer than the current estimate and below
//!   1.5m is taken as-is on the very same sample. A new close obstacle must never be
//!   smoothed away.
//! - A reading clearly farther than a close (< 80cm) estimate jumps most of the way
//!   at once, so "path clear" feedback is not held back by filter lag.
//!
//! # Stuck Sensor
//! The VL53L1X occasionally locks up reporting max range. If more than
//! `stuck_reading_limit` consecutive readings sit at the top of the range and nothing
//! valid arrived within `stuck_timeout`, the filter resets itself and asks the caller
//! to reinitialize the driver.

use embassy_time::{Duration, Instant};
use libm::fabsf;
use moving_median::MovingMedian;

/// Shortest distance the sensor reports reliably
pub const MIN_DISTANCE_MM: u16 = 30;

/// Longest distance in long range mode (350cm)
pub const MAX_DISTANCE_MM: u16 = 3500;

/// Readings this close to max range count towards stuck detection
const STUCK_MARGIN_MM: u16 = 50;

/// Median window size
const MEDIAN_WINDOW_SIZE: usize = 5;

/// Number of samples averaged before the EMA takes over
const SEED_SAMPLES: u8 = 8;

/// Obstacle-appeared fast path: minimum approach and absolute limit
const APPEAR_DELTA_MM: f32 = 25.0;
const APPEAR_LIMIT_MM: f32 = 1500.0;

/// Obstacle-removed recovery path: minimum retreat and the "was close" limit
const CLEAR_DELTA_MM: f32 = 35.0;
const CLEAR_LIMIT_MM: f32 = 800.0;

/// Changes up to this size go through the EMA, larger ones take a partial step
const NORMAL_CHANGE_LIMIT_MM: f32 = 70.0;

/// EMA alpha bands, keyed by change magnitude
const ALPHA_MIN: f32 = 0.07;
const ALPHA_MID: f32 = 0.22;
const ALPHA_MAX: f32 = 0.35;
const CHANGE_SMALL_MM: f32 = 3.0;
const CHANGE_LARGE_MM: f32 = 20.0;

/// A change below this counts as a stable reading while recovering
const STABLE_CHANGE_MM: f32 = 15.0;

/// A single raw reading with its capture time
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DistanceSample {
    pub millimeters: u16,
    pub at: Instant,
}

impl DistanceSample {
    pub const fn new(millimeters: u16, at: Instant) -> Self {
        Self { millimeters, at }
    }
}

/// Result of feeding one sample into the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ingest {
    /// Sample was processed normally
    Accepted,
    /// Sample was processed but the sensor looks stuck at max range
    Stuck,
    /// Sensor stuck past the timeout: the filter was reset, reinitialize the driver
    ResetRequested,
}

/// How aggressively the filter follows a retreating obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterProfile {
    Conservative,
    Balanced,
    Fast,
}

/// Range filter tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Fraction of the gap closed in one step when an obstacle is removed
    pub recovery_rate: f32,
    /// Fraction of the gap closed for unconfirmed large changes
    pub conservative_rate: f32,
    /// EMA alpha while recovering towards a farther reading
    pub recovering_alpha: f32,
    /// Recovery mode ends after this long
    pub recovery_reset: Duration,
    /// ... or after more than this many stable readings
    pub required_stable: u8,
    /// Consecutive max-range readings before the sensor is suspected stuck
    pub stuck_reading_limit: u16,
    /// Time without a valid reading before a stuck sensor is reset
    pub stuck_timeout: Duration,
}

impl FilterConfig {
    pub const fn new() -> Self {
        Self::for_profile(FilterProfile::Balanced)
    }

    pub const fn for_profile(profile: FilterProfile) -> Self {
        let (recovery_rate, conservative_rate, recovering_alpha, reset_ms, required_stable) = match profile {
            FilterProfile::Conservative => (0.9, 0.08, ALPHA_MAX * 0.7, 3500, 6),
            FilterProfile::Balanced => (0.95, 0.12, ALPHA_MAX * 0.9, 2500, 4),
            FilterProfile::Fast => (1.0, 0.18, ALPHA_MAX * 1.2, 2000, 3),
        };
        Self {
            recovery_rate,
            conservative_rate,
            recovering_alpha,
            recovery_reset: Duration::from_millis(reset_ms),
            required_stable,
            stuck_reading_limit: 50,
            stuck_timeout: Duration::from_secs(5),
        }
    }

    pub const fn set_stuck_reading_limit(mut self, limit: u16) -> Self {
        self.stuck_reading_limit = limit;
        self
    }

    pub const fn set_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Median prefilter + adaptive EMA over raw ToF readings
pub struct RangeFilter {
    config: FilterConfig,
    window: MovingMedian<f32, MEDIAN_WINDOW_SIZE>,
    /// Current estimate, also the "last stable" reference for the next sample
    filtered: f32,
    seeded: u8,
    recovering: bool,
    recovery_started: Instant,
    stable_readings: u8,
    consecutive_max: u16,
    last_valid: Instant,
}

impl RangeFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            window: MovingMedian::new(),
            filtered: MAX_DISTANCE_MM as f32,
            seeded: 0,
            recovering: false,
            recovery_started: Instant::from_ticks(0),
            stable_readings: 0,
            consecutive_max: 0,
            last_valid: Instant::from_ticks(0),
        }
    }

    /// Current filtered distance in millimeters
    pub fn current(&self) -> f32 {
        self.filtered
    }

    /// True once the seeding phase is over
    pub fn is_seeded(&self) -> bool {
        self.seeded >= SEED_SAMPLES
    }

    /// Feeds one raw sample
    pub fn ingest(&mut self, sample: DistanceSample) -> Ingest {
        let raw_mm = sample.millimeters.min(MAX_DISTANCE_MM);

        let mut outcome = Ingest::Accepted;
        if raw_mm >= MAX_DISTANCE_MM - STUCK_MARGIN_MM {
            self.consecutive_max = self.consecutive_max.saturating_add(1);
            if self.consecutive_max > self.config.stuck_reading_limit {
                if sample.at.saturating_duration_since(self.last_valid) > self.config.stuck_timeout {
                    warn!("range sensor stuck at max range, resetting");
                    self.reset(sample.at);
                    return Ingest::ResetRequested;
                }
                outcome = Ingest::Stuck;
            }
        } else {
            self.consecutive_max = 0;
            self.last_valid = sample.at;
        }

        let raw = raw_mm as f32;
        self.window.add_value(raw);

        if self.seeded < SEED_SAMPLES {
            self.seed(self.window.median());
            return outcome;
        }

        if raw <= self.filtered - APPEAR_DELTA_MM && raw < APPEAR_LIMIT_MM {
            self.snap_to(raw);
            return outcome;
        }

        let median = self.window.median();
        self.smooth(median, sample.at);
        outcome
    }

    /// Drops all history, back to max range and a fresh seeding phase
    pub fn reset(&mut self, now: Instant) {
        self.window = MovingMedian::new();
        self.filtered = MAX_DISTANCE_MM as f32;
        self.seeded = 0;
        self.recovering = false;
        self.stable_readings = 0;
        self.consecutive_max = 0;
        self.last_valid = now;
    }

    fn seed(&mut self, median: f32) {
        if median < MIN_DISTANCE_MM as f32 || median > MAX_DISTANCE_MM as f32 {
            return;
        }
        let n = self.seeded as f32;
        self.filtered = (self.filtered * n + median) / (n + 1.0);
        self.seeded += 1;
    }

    /// Obstacle appeared: take the reading as-is and forget the farther history,
    /// otherwise the next median would drag the estimate back out
    fn snap_to(&mut self, raw: f32) {
        self.recovering = false;
        self.stable_readings = 0;
        self.window = MovingMedian::new();
        for _ in 0..MEDIAN_WINDOW_SIZE {
            self.window.add_value(raw);
        }
        self.filtered = raw.clamp(MIN_DISTANCE_MM as f32, MAX_DISTANCE_MM as f32);
    }

    fn smooth(&mut self, median: f32, now: Instant) {
        let last_stable = self.filtered;
        let change = fabsf(median - last_stable);

        if median > last_stable + CLEAR_DELTA_MM && last_stable < CLEAR_LIMIT_MM {
            // obstacle removed
            self.recovering = true;
            self.recovery_started = now;
            self.stable_readings = 0;
            self.filtered = last_stable + (median - last_stable) * self.config.recovery_rate;
        } else if change <= NORMAL_CHANGE_LIMIT_MM {
            let mut alpha = if change > CHANGE_LARGE_MM {
                ALPHA_MAX
            } else if change < CHANGE_SMALL_MM {
                ALPHA_MIN
            } else {
                ALPHA_MID
            };
            if self.recovering && median > last_stable {
                alpha = self.config.recovering_alpha;
            }
            self.filtered = alpha * median + (1.0 - alpha) * last_stable;

            if change < STABLE_CHANGE_MM {
                self.stable_readings = self.stable_readings.saturating_add(1);
            } else {
                self.stable_readings = 0;
            }
        } else {
            self.filtered = last_stable + (median - last_stable) * self.config.conservative_rate;
            self.stable_readings = 0;
        }

        if self.recovering
            && (now.saturating_duration_since(self.recovery_started) > self.config.recovery_reset
                || self.stable_readings > self.config.required_stable)
        {
            self.recovering = false;
        }

        self.filtered = self.filtered.clamp(MIN_DISTANCE_MM as f32, MAX_DISTANCE_MM as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn seeded(value: u16) -> RangeFilter {
        let mut filter = RangeFilter::new(FilterConfig::new());
        for i in 0..8 {
            filter.ingest(DistanceSample::new(value, at(i * 30)));
        }
        assert!(filter.is_seeded());
        filter
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(fabsf(actual - expected) < 0.05, "expected {expected}, got {actual}");
    }

    #[test]
    fn seeding_averages_the_first_samples() {
        let filter = seeded(1200);
        assert_close(filter.current(), 1200.0);
    }

    #[test]
    fn seeding_skips_out_of_range_medians() {
        let mut filter = RangeFilter::new(FilterConfig::new());
        for i in 0..8 {
            filter.ingest(DistanceSample::new(10, at(i * 30)));
        }
        assert!(!filter.is_seeded());
        assert_close(filter.current(), MAX_DISTANCE_MM as f32);
    }

    #[test]
    fn close_obstacle_is_reported_on_the_same_sample() {
        for raw in [1499u16, 1200, 600, 250, 30] {
            let mut filter = seeded(3500);
            filter.ingest(DistanceSample::new(raw, at(500)));
            assert_eq!(filter.current(), raw as f32);
        }
    }

    #[test]
    fn approaching_obstacle_tracks_every_step() {
        let mut filter = seeded(2000);
        let mut t = 300;
        for raw in [1400u16, 1300, 1100, 900, 700, 650, 400] {
            filter.ingest(DistanceSample::new(raw, at(t)));
            assert_eq!(filter.current(), raw as f32);
            t += 30;
        }
    }

    #[test]
    fn snap_reseeds_the_median_window() {
        let mut filter = seeded(3500);
        filter.ingest(DistanceSample::new(600, at(300)));
        filter.ingest(DistanceSample::new(600, at(330)));
        assert_close(filter.current(), 600.0);
    }

    #[test]
    fn single_far_spike_is_rejected() {
        let mut filter = seeded(1000);
        filter.ingest(DistanceSample::new(3000, at(300)));
        assert_close(filter.current(), 1000.0);
    }

    #[test]
    fn removed_obstacle_recovers_most_of_the_way_at_once() {
        let mut filter = seeded(500);
        filter.ingest(DistanceSample::new(2000, at(300)));
        filter.ingest(DistanceSample::new(2000, at(330)));
        assert_close(filter.current(), 500.0);
        // third sample turns the median over
        filter.ingest(DistanceSample::new(2000, at(360)));
        assert_close(filter.current(), 500.0 + 1500.0 * 0.95);
    }

    #[test]
    fn medium_change_uses_mid_alpha() {
        let mut filter = seeded(1000);
        for i in 0..3 {
            filter.ingest(DistanceSample::new(1010, at(300 + i * 30)));
        }
        assert_close(filter.current(), 1000.0 + 0.22 * 10.0);
    }

    #[test]
    fn unconfirmed_large_change_takes_a_partial_step() {
        let mut filter = seeded(1000);
        for i in 0..3 {
            filter.ingest(DistanceSample::new(1200, at(300 + i * 30)));
        }
        assert_close(filter.current(), 1000.0 + 200.0 * 0.12);
    }

    #[test]
    fn fast_profile_jumps_fully() {
        let mut filter = RangeFilter::new(FilterConfig::for_profile(FilterProfile::Fast));
        for i in 0..8 {
            filter.ingest(DistanceSample::new(500, at(i * 30)));
        }
        for i in 0..3 {
            filter.ingest(DistanceSample::new(2000, at(300 + i * 30)));
        }
        assert_close(filter.current(), 2000.0);
    }

    #[test]
    fn estimate_stays_clamped() {
        let mut filter = seeded(100);
        filter.ingest(DistanceSample::new(5, at(300)));
        assert_eq!(filter.current(), MIN_DISTANCE_MM as f32);

        let mut filter = seeded(3400);
        for i in 0..10 {
            filter.ingest(DistanceSample::new(u16::MAX, at(300 + i * 30)));
        }
        assert!(filter.current() <= MAX_DISTANCE_MM as f32);
    }

    #[test]
    fn stuck_sensor_within_timeout_is_only_flagged() {
        let mut filter = RangeFilter::new(FilterConfig::new());
        filter.ingest(DistanceSample::new(1000, at(0)));
        let mut last = Ingest::Accepted;
        for i in 1..=51 {
            last = filter.ingest(DistanceSample::new(3500, at(i * 10)));
        }
        assert_eq!(last, Ingest::Stuck);
    }

    #[test]
    fn stuck_sensor_past_timeout_requests_reset() {
        let mut filter = RangeFilter::new(FilterConfig::new());
        filter.ingest(DistanceSample::new(1000, at(0)));
        let mut outcome = Ingest::Accepted;
        for i in 1..=51 {
            outcome = filter.ingest(DistanceSample::new(3490, at(i * 100)));
            if outcome == Ingest::ResetRequested {
                break;
            }
        }
        assert_eq!(outcome, Ingest::ResetRequested);
        assert_eq!(filter.current(), MAX_DISTANCE_MM as f32);
        assert!(!filter.is_seeded());
    }

    #[test]
    fn valid_reading_clears_stuck_count() {
        let config = FilterConfig::new().set_stuck_reading_limit(3).set_stuck_timeout(Duration::from_millis(0));
        let mut filter = RangeFilter::new(config);
        for i in 0..3 {
            assert_eq!(filter.ingest(DistanceSample::new(3500, at(i * 10))), Ingest::Accepted);
        }
        filter.ingest(DistanceSample::new(800, at(40)));
        for i in 0..3 {
            assert_eq!(filter.ingest(DistanceSample::new(3500, at(50 + i * 10))), Ingest::Accepted);
        }
        assert_eq!(filter.ingest(DistanceSample::new(3500, at(100))), Ingest::ResetRequested);
    }
}
