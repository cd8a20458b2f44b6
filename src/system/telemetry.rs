//! Outbound Telemetry Queue
//!
//! Bounded FIFO between the producers (sensing loop, radar sweep, reporters) and the
//! transmit task. Producers never wait: when the queue is full the oldest packet is
//! dropped to make room and the drop counter goes up. Freshest data wins, a slow or
//! absent peer can never stall the sensing loop.

use crate::system::frame::{Line, Telemetry};
use crate::system::link::LinkSession;
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::Instant;

/// Queue depth used by the firmware
pub const TELEMETRY_QUEUE_SIZE: usize = 20;

/// A framed line waiting for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPacket {
    pub payload: Line,
    pub enqueued_at: Instant,
}

pub struct TelemetryQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, TelemetryPacket, N>,
    dropped: AtomicU32,
    enqueued: AtomicU32,
}

impl<const N: usize> TelemetryQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
            enqueued: AtomicU32::new(0),
        }
    }

    /// Queues a line without blocking, dropping the oldest packet when full
    ///
    /// Returns false only if another producer refilled the queue in between, in which
    /// case the new line is dropped as well.
    pub fn enqueue(&self, payload: Line) -> bool {
        let packet = TelemetryPacket {
            payload,
            enqueued_at: Instant::now(),
        };
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        let packet = match self.channel.try_send(packet) {
            Ok(()) => return true,
            Err(TrySendError::Full(packet)) => packet,
        };

        if self.channel.try_receive().is_ok() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        match self.channel.try_send(packet) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Waits for the next packet
    pub async fn dequeue(&self) -> TelemetryPacket {
        self.channel.receive().await
    }

    /// Discards everything pending, returns how many packets were removed
    pub fn flush(&self) -> usize {
        let mut flushed = 0;
        while self.channel.try_receive().is_ok() {
            flushed += 1;
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Packets dropped for lack of space since start
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Packets offered to the queue since start
    pub fn enqueued(&self) -> u32 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for TelemetryQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of the uplink: frames and queues messages while a peer is connected
#[derive(Clone, Copy)]
pub struct Uplink<'a, const N: usize> {
    queue: &'a TelemetryQueue<N>,
    link: &'a LinkSession,
}

impl<'a, const N: usize> Uplink<'a, N> {
    pub const fn new(queue: &'a TelemetryQueue<N>, link: &'a LinkSession) -> Self {
        Self { queue, link }
    }

    /// Queues `message` if connected; never blocks
    pub fn publish(&self, message: &Telemetry) -> bool {
        if !self.link.try_is_connected() {
            return false;
        }
        match message.encode() {
            Ok(line) => self.queue.enqueue(line),
            Err(e) => {
                warn!("dropping {} line: {:?}", message.key(), e);
                false
            }
        }
    }

    pub fn queue(&self) -> &'a TelemetryQueue<N> {
        self.queue
    }

    pub fn link(&self) -> &'a LinkSession {
        self.link
    }
}
