//! Hardware Resource Management
//!
//! Allocates the pins and peripherals of the cane to the tasks that own them.
//!
//! # Resource Groups
//! - ToF Sensor: VL53L1X on I2C0
//! - Sweep Servo: hobby servo driven by PIO PWM
//! - Feedback: buzzer and the two vibration motors
//! - BLE Bridge: UART to the BLE module plus its connection STATE pin

use assign_resources::assign_resources;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{self, PIO0, UART0};
use embassy_rp::pio::InterruptHandler as PioInterruptHandler;
use embassy_rp::uart::InterruptHandler as UartInterruptHandler;

assign_resources! {
    /// VL53L1X time-of-flight sensor
    tof_sensor: TofSensorResources {
        i2c: I2C0,
        scl_pin: PIN_5,
        sda_pin: PIN_4,
    },
    /// Servo that sweeps the ToF sensor in RADAR mode
    sweep_servo: SweepServoResources {
        pin: PIN_15,
        pio: PIO0,
    },
    /// Buzzer and vibration motor driver inputs
    feedback: FeedbackResources {
        buzzer_pin: PIN_16,
        vibration_left_pin: PIN_17,
        vibration_right_pin: PIN_18,
    },
    /// UART BLE bridge module
    ble_bridge: BleBridgeResources {
        uart: UART0,
        tx_pin: PIN_0,
        rx_pin: PIN_1,
        tx_dma: DMA_CH0,
        rx_dma: DMA_CH1,
        state_pin: PIN_2, // high while a peer is connected
    },
}

bind_interrupts!(pub struct Irqs {
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
    UART0_IRQ => UartInterruptHandler<UART0>;
});
