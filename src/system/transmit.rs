//! Transmit Task
//!
//! Single consumer of the telemetry queue. Waits for the next packet, checks the link
//! and hands the line to the radio, never faster than one line per `min_interval`.
//!
//! A packet that cannot be sent (link not ready, radio refused it) is discarded, not
//! re-queued, and the task backs off before taking the next one. Retrying old data
//! would only delay newer data.

use crate::system::device::Radio;
use crate::system::link::{LinkError, LinkSession};
use crate::system::telemetry::{TelemetryPacket, TelemetryQueue};
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;

/// Chunk size for large payloads, leaves room for the newline
pub const CHUNK_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitConfig {
    /// Minimum spacing between two notifications
    pub min_interval: Duration,
    /// Pause after a discarded packet
    pub backoff: Duration,
    /// Pause between the chunks of a large payload
    pub chunk_gap: Duration,
}

impl TransmitConfig {
    pub const fn new() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            backoff: Duration::from_millis(100),
            chunk_gap: Duration::from_millis(10),
        }
    }

    pub const fn set_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub const fn set_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub const fn set_chunk_gap(mut self, chunk_gap: Duration) -> Self {
        self.chunk_gap = chunk_gap;
        self
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Transmission counters, shared with the reporting task
pub struct TransmitStats {
    sent: AtomicU32,
    discarded: AtomicU32,
}

impl TransmitStats {
    pub const fn new() -> Self {
        Self {
            sent: AtomicU32::new(0),
            discarded: AtomicU32::new(0),
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u32 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl Default for TransmitStats {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to a dequeued packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Sent,
    Discarded,
}

pub struct Transmitter<'a, const N: usize, R: Radio> {
    queue: &'a TelemetryQueue<N>,
    link: &'a LinkSession,
    radio: &'a Mutex<CriticalSectionRawMutex, R>,
    stats: &'a TransmitStats,
    config: TransmitConfig,
    last_sent: Option<Instant>,
}

impl<'a, const N: usize, R: Radio> Transmitter<'a, N, R> {
    pub fn new(
        queue: &'a TelemetryQueue<N>,
        link: &'a LinkSession,
        radio: &'a Mutex<CriticalSectionRawMutex, R>,
        stats: &'a TransmitStats,
        config: TransmitConfig,
    ) -> Self {
        Self {
            queue,
            link,
            radio,
            stats,
            config,
            last_sent: None,
        }
    }

    /// Consumes the queue forever
    pub async fn run(&mut self) {
        info!("transmitter started");
        loop {
            self.step().await;
        }
    }

    /// Waits for one packet and tries to send it
    pub async fn step(&mut self) -> Outcome {
        let packet = self.queue.dequeue().await;
        self.send(packet).await
    }

    async fn send(&mut self, packet: TelemetryPacket) -> Outcome {
        if !self.link.ready_to_send(Instant::now()).await {
            return self.discard().await;
        }

        if let Some(last) = self.last_sent {
            let since = Instant::now().saturating_duration_since(last);
            if since < self.config.min_interval {
                Timer::after(self.config.min_interval - since).await;
            }
        }

        let result = {
            let mut radio = self.radio.lock().await;
            radio.notify(&packet.payload).await
        };
        match result {
            Ok(()) => {
                self.last_sent = Some(Instant::now());
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "sent {} bytes, queued for {} ms",
                    packet.payload.len(),
                    packet.enqueued_at.elapsed().as_millis()
                );
                Outcome::Sent
            }
            Err(_) => {
                warn!("radio refused packet");
                self.discard().await
            }
        }
    }

    async fn discard(&mut self) -> Outcome {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        Timer::after(self.config.backoff).await;
        Outcome::Discarded
    }
}

/// Sends a large payload directly, bypassing the queue
///
/// The payload is split into newline terminated chunks of at most [`CHUNK_LEN`]
/// bytes, spaced by `chunk_gap`. The chunks carry no sequence tag, so the radio
/// stays locked for the whole payload and queued lines wait until it is done.
/// Returns the number of chunks sent.
pub async fn send_chunked<R: Radio>(
    radio: &Mutex<CriticalSectionRawMutex, R>,
    link: &LinkSession,
    payload: &[u8],
    config: &TransmitConfig,
) -> Result<usize, LinkError> {
    if !link.ready_to_send(Instant::now()).await {
        return Err(if link.is_connected().await? {
            LinkError::NotReady
        } else {
            LinkError::NotConnected
        });
    }

    let mut radio = radio.lock().await;
    let mut sent = 0;
    for chunk in payload.chunks(CHUNK_LEN) {
        if sent > 0 {
            Timer::after(config.chunk_gap).await;
        }
        let mut line: Vec<u8, { CHUNK_LEN + 1 }> = Vec::new();
        // chunks() never yields more than CHUNK_LEN bytes
        let _ = line.extend_from_slice(chunk);
        let _ = line.push(b'\n');
        radio.notify(&line).await.map_err(|_| LinkError::Radio)?;
        sent += 1;
    }
    debug!("sent {} bytes in {} chunks", payload.len(), sent);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::frame::Telemetry;
    use crate::system::link::tests::FakeRadio;
    use crate::system::link::{LinkConfig, LinkEvent};
    use embassy_futures::block_on;

    fn fast_config() -> TransmitConfig {
        TransmitConfig::new()
            .set_backoff(Duration::from_millis(1))
            .set_chunk_gap(Duration::from_millis(1))
    }

    fn settled_link() -> LinkConfig {
        LinkConfig::new().set_settle(Duration::from_millis(0))
    }

    async fn connect<const N: usize>(link: &LinkSession, queue: &TelemetryQueue<N>) {
        let mut radio = FakeRadio::default();
        link.handle(LinkEvent::Connected, Instant::now(), queue, &mut radio)
            .await
            .unwrap();
    }

    #[test]
    fn sends_in_fifo_order_with_spacing() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(settled_link());
        let radio = Mutex::new(FakeRadio::default());
        let stats = TransmitStats::new();
        block_on(async {
            connect(&link, &queue).await;
            for mm in [100u16, 200, 300] {
                queue.enqueue(Telemetry::Obstacle(mm).encode().unwrap());
            }
            let mut transmitter = Transmitter::new(&queue, &link, &radio, &stats, fast_config());
            let start = Instant::now();
            for _ in 0..3 {
                assert_eq!(transmitter.step().await, Outcome::Sent);
            }
            assert!(start.elapsed() >= Duration::from_millis(20));
        });
        let radio = radio.try_lock().unwrap();
        assert_eq!(radio.sent, vec![b"OBST:100\n".to_vec(), b"OBST:200\n".to_vec(), b"OBST:300\n".to_vec()]);
        assert_eq!(stats.sent(), 3);
    }

    #[test]
    fn discards_while_disconnected() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(settled_link());
        let radio = Mutex::new(FakeRadio::default());
        let stats = TransmitStats::new();
        queue.enqueue(Telemetry::TofMode(true).encode().unwrap());
        queue.enqueue(Telemetry::TofMode(false).encode().unwrap());
        block_on(async {
            let mut transmitter = Transmitter::new(&queue, &link, &radio, &stats, fast_config());
            assert_eq!(transmitter.step().await, Outcome::Discarded);
            assert_eq!(transmitter.step().await, Outcome::Discarded);
        });
        assert!(queue.is_empty());
        assert_eq!(stats.discarded(), 2);
        assert!(radio.try_lock().unwrap().sent.is_empty());
    }

    #[test]
    fn failed_notify_is_not_requeued() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(settled_link());
        let radio = Mutex::new(FakeRadio {
            fail_notify: true,
            ..FakeRadio::default()
        });
        let stats = TransmitStats::new();
        block_on(async {
            connect(&link, &queue).await;
            queue.enqueue(Telemetry::Steps(12).encode().unwrap());
            let mut transmitter = Transmitter::new(&queue, &link, &radio, &stats, fast_config());
            assert_eq!(transmitter.step().await, Outcome::Discarded);
        });
        assert!(queue.is_empty());
        assert_eq!(stats.discarded(), 1);
        assert_eq!(stats.sent(), 0);
    }

    #[test]
    fn waits_for_the_settle_delay() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(LinkConfig::new());
        let radio = Mutex::new(FakeRadio::default());
        let stats = TransmitStats::new();
        block_on(async {
            connect(&link, &queue).await;
            queue.enqueue(Telemetry::Lux(5).encode().unwrap());
            let mut transmitter = Transmitter::new(&queue, &link, &radio, &stats, fast_config());
            assert_eq!(transmitter.step().await, Outcome::Discarded);
        });
    }

    #[test]
    fn large_payload_goes_out_in_chunks() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(settled_link());
        let radio = Mutex::new(FakeRadio::default());
        let payload = [b'a'; 130];
        block_on(async {
            assert_eq!(
                send_chunked(&radio, &link, &payload, &fast_config()).await,
                Err(LinkError::NotConnected)
            );
            connect(&link, &queue).await;
            assert_eq!(send_chunked(&radio, &link, &payload, &fast_config()).await, Ok(3));
        });
        let radio = radio.try_lock().unwrap();
        let lengths: std::vec::Vec<usize> = radio.sent.iter().map(|chunk| chunk.len()).collect();
        assert_eq!(lengths, vec![61, 61, 11]);
        assert!(radio.sent.iter().all(|chunk| chunk.last() == Some(&b'\n')));
        assert!(queue.is_empty());
    }

    #[test]
    fn chunked_send_waits_for_the_settle_delay() {
        let queue = TelemetryQueue::<8>::new();
        let link = LinkSession::new(LinkConfig::new());
        let radio = Mutex::new(FakeRadio::default());
        block_on(async {
            connect(&link, &queue).await;
            assert_eq!(
                send_chunked(&radio, &link, &[b'h'; 130], &fast_config()).await,
                Err(LinkError::NotReady)
            );
        });
        assert!(radio.try_lock().unwrap().sent.is_empty());
    }
}
