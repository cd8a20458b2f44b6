//! System Events
//!
//! Defines events and channels for inter-task communication.

use crate::system::alert::ProximityLevel;
use crate::system::command::Command;
use crate::system::link::LinkEvent;
use crate::system::scan::ScanMode;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

/// Multi-producer, single-consumer event channel with capacity of 10
pub static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, Events, 10> = Channel::new();

/// Latest scan mode request for the sensing task
static SCAN_REQUEST: Signal<CriticalSectionRawMutex, ScanRequest> = Signal::new();

/// Sensor reset request for the sensing task
static SENSOR_RESET: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Sends an event to the system channel
pub async fn send(event: Events) {
    EVENT_CHANNEL.sender().send(event).await;
}

/// Sends an event if there is room, for callers that must not wait
pub fn try_send(event: Events) -> bool {
    EVENT_CHANNEL.try_send(event).is_ok()
}

/// Receives the next event from the system channel
pub async fn wait() -> Events {
    EVENT_CHANNEL.receiver().receive().await
}

/// Asks the sensing task to change the scan mode, a newer request replaces an older one
pub fn request_scan_mode(request: ScanRequest) {
    SCAN_REQUEST.signal(request);
}

/// Takes a pending scan mode request without waiting
pub fn take_scan_request() -> Option<ScanRequest> {
    SCAN_REQUEST.try_take()
}

pub fn request_sensor_reset() {
    SENSOR_RESET.signal(());
}

pub fn take_sensor_reset() -> bool {
    SENSOR_RESET.try_take().is_some()
}

/// System-wide events
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Events {
    /// A command line arrived from the app
    CommandReceived(Command),
    /// BLE peer connected or disconnected
    LinkChanged(LinkEvent),
    /// Sensing task finished a scan mode switch
    ScanModeChanged(ScanMode),
    /// Proximity level changed
    ProximityChanged(ProximityLevel),
    /// ToF sensor was found stuck and reinitialized
    SensorReset,
}

/// Scan mode change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanRequest {
    Set(ScanMode),
    Toggle,
}
