//! Device Interfaces
//!
//! The core never touches a peripheral directly. The firmware tasks implement these
//! traits for the real hardware (VL53L1X, hobby servo, buzzer/vibration pins, UART
//! BLE bridge); tests implement them with recording fakes.

/// Time-of-flight range sensor with a non-blocking "data ready" poll pattern
pub trait RangeSensor {
    /// Returns true when a new measurement can be read without waiting
    fn data_ready(&mut self) -> bool;

    /// Reads the latest measurement in millimeters and re-arms the sensor
    fn read(&mut self) -> u16;

    /// Restarts the sensor driver after it was found stuck
    fn reinitialize(&mut self);
}

/// Scan actuator (servo) positioned in whole degrees
///
/// Moves are fire-and-forget: there is no completion callback, the caller has to
/// allow settle time itself.
pub trait Actuator {
    fn move_to(&mut self, angle_degrees: u8);
}

/// Physical feedback outputs
pub trait FeedbackOutputs {
    fn set_buzzer(&mut self, on: bool);
    fn set_vibration(&mut self, on: bool);
}

/// Wireless peer transport (outbound notify characteristic + advertising control)
#[allow(async_fn_in_trait)]
pub trait Radio {
    type Error;

    /// Notifies one framed line to the connected peer
    async fn notify(&mut self, line: &[u8]) -> Result<(), Self::Error>;

    /// Makes the device discoverable again after the peer went away
    async fn start_advertising(&mut self) -> Result<(), Self::Error>;
}
