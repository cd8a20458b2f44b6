//! BLE Link Session
//!
//! Tracks whether a peer is connected and when it connected. The platform
//! connection hook reports [`LinkEvent`]s, producers and the transmit task only
//! ever read the state.
//!
//! # Locking
//! Readers take the state lock with a short timeout. A reader that cannot get the
//! lock in time treats the link as disconnected: a skipped packet is harmless, a
//! stalled sensing loop is not.
//!
//! # Disconnect
//! Pending packets are flushed while the state lock is held, before the state
//! flips. A reconnecting peer therefore never receives stale data from the
//! previous session.

use crate::system::device::Radio;
use crate::system::telemetry::TelemetryQueue;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    #[error("link state lock timed out")]
    LockTimeout,
    #[error("no peer connected")]
    NotConnected,
    #[error("peer connected, settle delay pending")]
    NotReady,
    #[error("radio did not accept the request")]
    Radio,
}

/// Connection events from the platform hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkState {
    pub connected: bool,
    pub connected_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Longest a reader waits for the state lock
    pub lock_timeout: Duration,
    /// Time the peer gets after connecting before data is sent
    pub settle: Duration,
}

impl LinkConfig {
    pub const fn new() -> Self {
        Self {
            lock_timeout: Duration::from_millis(10),
            settle: Duration::from_millis(500),
        }
    }

    pub const fn set_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub const fn set_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LinkSession {
    state: Mutex<CriticalSectionRawMutex, LinkState>,
    config: LinkConfig,
}

impl LinkSession {
    pub const fn new(config: LinkConfig) -> Self {
        Self {
            state: Mutex::new(LinkState {
                connected: false,
                connected_at: None,
            }),
            config,
        }
    }

    /// Applies a connection event
    ///
    /// On disconnect the queue is flushed under the state lock and advertising is
    /// restarted afterwards.
    pub async fn handle<const N: usize, R: Radio>(
        &self,
        event: LinkEvent,
        now: Instant,
        queue: &TelemetryQueue<N>,
        radio: &mut R,
    ) -> Result<(), LinkError> {
        match event {
            LinkEvent::Connected => {
                let mut state = self.state.lock().await;
                state.connected = true;
                state.connected_at = Some(now);
                info!("peer connected");
            }
            LinkEvent::Disconnected => {
                {
                    let mut state = self.state.lock().await;
                    let flushed = queue.flush();
                    state.connected = false;
                    state.connected_at = None;
                    info!("peer disconnected, {} queued packets flushed", flushed);
                }
                radio.start_advertising().await.map_err(|_| LinkError::Radio)?;
                info!("advertising restarted");
            }
        }
        Ok(())
    }

    /// Connection state, fails with `LockTimeout` if the lock is contended
    pub async fn is_connected(&self) -> Result<bool, LinkError> {
        Ok(self.lock().await?.connected)
    }

    /// Non-blocking connection check for producers, contention reads as disconnected
    pub fn try_is_connected(&self) -> bool {
        self.state.try_lock().map(|state| state.connected).unwrap_or(false)
    }

    /// True when connected and the settle delay has passed
    pub async fn ready_to_send(&self, now: Instant) -> bool {
        match self.lock().await {
            Ok(state) => match (state.connected, state.connected_at) {
                (true, Some(at)) => now.saturating_duration_since(at) >= self.config.settle,
                _ => false,
            },
            Err(_) => false,
        }
    }

    pub async fn state(&self) -> Result<LinkState, LinkError> {
        Ok(*self.lock().await?)
    }

    async fn lock(&self) -> Result<MutexGuard<'_, CriticalSectionRawMutex, LinkState>, LinkError> {
        with_timeout(self.config.lock_timeout, self.state.lock())
            .await
            .map_err(|_| LinkError::LockTimeout)
    }
}
