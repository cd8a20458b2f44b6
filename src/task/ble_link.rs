//! BLE Link
//!
//! The BLE side is a UART bridge module: every line written to the UART is notified
//! to the app, every write from the app arrives as a UART line, and the STATE pin is
//! high while a peer is connected.
//!
//! Two tasks run the link. `link_monitor` turns STATE pin edges into link events,
//! `command_reader` acknowledges and forwards inbound commands.

use crate::task::resources::{BleBridgeResources, Irqs};
use crate::task::{LINK, TELEMETRY_QUEUE};
use defmt::{debug, info, warn};
use embassy_rp::gpio::{Input, Pull};
use embassy_rp::peripherals::UART0;
use embassy_rp::uart::{self, Async, Uart, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use smart_cane::system::command::{self, Command};
use smart_cane::system::device::Radio;
use smart_cane::system::event::{self, Events};
use smart_cane::system::frame::MAX_LINE_LEN;
use smart_cane::system::link::LinkEvent;

const BRIDGE_BAUDRATE: u32 = 115_200;

/// STATE pin must hold its level this long before it counts
const STATE_DEBOUNCE: Duration = Duration::from_millis(50);

/// The bridge starts advertising again after a reset
const ADVERTISE_COMMAND: &[u8] = b"AT+RESET\r\n";

/// Status lines the bridge module itself prints, e.g. `OK+CONN`
const BRIDGE_STATUS_PREFIX: &str = "OK+";

/// Outbound side of the bridge, shared by the transmit and reporting tasks
pub type SharedRadio = Mutex<CriticalSectionRawMutex, BleBridge>;

pub struct BleBridge {
    tx: UartTx<'static, UART0, Async>,
}

impl Radio for BleBridge {
    type Error = uart::Error;

    async fn notify(&mut self, line: &[u8]) -> Result<(), Self::Error> {
        self.tx.write(line).await
    }

    async fn start_advertising(&mut self) -> Result<(), Self::Error> {
        self.tx.write(ADVERTISE_COMMAND).await
    }
}

/// Sets up the bridge UART and the STATE pin
pub fn split(r: BleBridgeResources) -> (BleBridge, UartRx<'static, UART0, Async>, Input<'static>) {
    let mut config = uart::Config::default();
    config.baudrate = BRIDGE_BAUDRATE;
    let uart = Uart::new(r.uart, r.tx_pin, r.rx_pin, Irqs, r.tx_dma, r.rx_dma, config);
    let (tx, rx) = uart.split();
    let state = Input::new(r.state_pin, Pull::Down);
    (BleBridge { tx }, rx, state)
}

/// Follows the STATE pin and applies connection changes to the link session
#[embassy_executor::task]
pub async fn link_monitor(mut state: Input<'static>, radio: &'static SharedRadio) {
    info!("BLE link monitor started");
    let mut connected = false;
    loop {
        let level = state.is_high();
        if level != connected {
            connected = level;
            let link_event = if connected {
                LinkEvent::Connected
            } else {
                LinkEvent::Disconnected
            };
            let result = {
                let mut radio = radio.lock().await;
                LINK.handle(link_event, Instant::now(), &TELEMETRY_QUEUE, &mut *radio).await
            };
            if let Err(e) = result {
                warn!("link event {} not fully applied: {}", link_event, e);
            }
            event::send(Events::LinkChanged(link_event)).await;
        }

        state.wait_for_any_edge().await;
        Timer::after(STATE_DEBOUNCE).await;
    }
}

/// Reads inbound lines, acknowledges them and forwards the commands
#[embassy_executor::task]
pub async fn command_reader(mut rx: UartRx<'static, UART0, Async>) {
    info!("BLE command reader started");
    let mut line: Vec<u8, MAX_LINE_LEN> = Vec::new();
    let mut overflow = false;
    let mut byte = [0u8; 1];
    loop {
        if let Err(e) = rx.read(&mut byte).await {
            warn!("bridge UART read failed: {}", e);
            line.clear();
            continue;
        }

        match byte[0] {
            b'\r' | b'\n' => {
                if !overflow {
                    handle_line(&line).await;
                }
                line.clear();
                overflow = false;
            }
            b => {
                // longer lines are dropped whole
                if line.push(b).is_err() {
                    overflow = true;
                }
            }
        }
    }
}

async fn handle_line(line: &[u8]) {
    let Ok(text) = core::str::from_utf8(line) else {
        warn!("dropping non UTF-8 command");
        return;
    };
    if text.trim_start().starts_with(BRIDGE_STATUS_PREFIX) {
        debug!("bridge status {}", text);
        return;
    }
    let Some(command) = Command::parse(text) else {
        return;
    };
    if let Some(ack) = command::acknowledge(text) {
        TELEMETRY_QUEUE.enqueue(ack);
    }
    info!("command {}", command);
    event::send(Events::CommandReceived(command)).await;
}
